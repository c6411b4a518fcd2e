fn main() {
    if let Err(err) = turnover_loader::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

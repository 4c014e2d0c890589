fn main() {
    if let Err(e) = communitylens_lib::run() {
        eprintln!("communitylens: {e}");
        std::process::exit(1);
    }
}

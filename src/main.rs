//! bioetl CLI binary.
//!
//! Minimal entrypoint: `cli::run()` handles all output including errors;
//! main only maps the returned code to the process exit status.

fn main() {
    if let Err(code) = bioetl::cli::run() {
        std::process::exit(code.as_i32());
    }
}

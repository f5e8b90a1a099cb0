// ============================================================================
// main.rs — ninja-lower CLI entry point
// ============================================================================

use clap::Parser;
use ninja_lower::Options;

fn main() {
    let options = Options::parse();

    if let Err(err) = ninja_lower::pipeline::run(&options) {
        eprintln!("error: {err}");
        let code = err
            .downcast_ref::<ninja_lower::Error>()
            .map(|e| e.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}

use mesh_tui::RunOptions;

fn main() {
    if handle_cli_flags() {
        return;
    }

    let options = match RunOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = mesh_tui::run(options) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> bool {
    let mut saw_flag = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("mesh-tui {}", mesh_tui::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "mesh-tui - Chat over a packet-radio mesh from the terminal.\n\n  --host <addr>        Radio bridge address (default localhost:4403)\n  --demo               Use a simulated mesh instead of a radio\n  --settings           Open the settings menu only\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                saw_flag = true;
            }
            _ => {}
        }
    }
    saw_flag
}

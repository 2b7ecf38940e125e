mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use session::{Session, TranscriptProfile};

const USAGE: &str = "Usage: hx711-emulator [--profile <session|single|contended|stalled>]";

fn main() -> io::Result<ExitCode> {
    let profile = match TranscriptProfile::from_args(env::args().skip(1)) {
        Ok(profile) => profile,
        Err(err) => {
            eprintln!("{err}\n{USAGE}");
            return Ok(ExitCode::from(2));
        }
    };

    let mut session = Session::new(profile)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{} ({})", profile.header(), profile.log_path())?;
    writeln!(out, "Type `help` for commands, `exit` to quit.")?;

    let mut lines = io::stdin().lock().lines();
    loop {
        write!(out, "[{}]> ", session.now())?;
        out.flush()?;

        let Some(line) = lines.next().transpose()? else {
            writeln!(out)?;
            break;
        };
        let command = line.trim();
        match command {
            "" => {}
            "exit" | "quit" => break,
            _ => {
                for response in session.handle_command(command)? {
                    writeln!(out, "{response}")?;
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

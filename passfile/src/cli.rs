//! Command-line surface.
//!
//! `passfile [OPTIONS] MOUNTPOINT pass-name`
//!
//! Flag parsing is a plain argument scan; a wrong positional count prints
//! usage and exits 2.

use std::path::PathBuf;

use passfile_core::retrieve::DEFAULT_COMMAND;

/// Default layout: password only.
pub const DEFAULT_LAYOUT: &str = "%p";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub mountpoint: PathBuf,
    /// Store entry name, e.g. `mail/alice`.
    pub pass_name: String,
    pub layout: String,
    /// Argv prefix used to invoke the store.
    pub pass_cmd: Vec<String>,
}

fn usage(program: &str) -> String {
    format!(
        "\
Usage: {program} [OPTIONS] MOUNTPOINT pass-name

Mounts one password-store entry as a single read-only file.

Options:
  --layout <template>   Layout template; %p is the password, %o the
                        one-time code (default: {DEFAULT_LAYOUT})
  --pass-cmd <command>  Command used to invoke the password store,
                        split on whitespace (default: {DEFAULT_COMMAND})
  -h, --help            Show this help
"
    )
}

/// Parse `std::env::args`, printing usage and exiting on error or `--help`.
pub fn parse() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let program = args
        .first()
        .map(String::as_str)
        .unwrap_or("passfile")
        .to_string();

    if args.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        eprint!("{}", usage(&program));
        std::process::exit(0);
    }

    match parse_from(&args[1..]) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {e}");
            eprint!("{}", usage(&program));
            std::process::exit(2);
        }
    }
}

fn parse_from(args: &[String]) -> Result<Options, String> {
    let mut layout = DEFAULT_LAYOUT.to_string();
    let mut pass_cmd = vec![DEFAULT_COMMAND.to_string()];
    let mut positional: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--layout" => {
                i += 1;
                layout = args
                    .get(i)
                    .ok_or("--layout requires a value")?
                    .clone();
            }
            s if s.starts_with("--layout=") => {
                layout = s["--layout=".len()..].to_string();
            }
            "--pass-cmd" => {
                i += 1;
                pass_cmd = split_command(args.get(i).ok_or("--pass-cmd requires a value")?)?;
            }
            s if s.starts_with("--pass-cmd=") => {
                pass_cmd = split_command(&s["--pass-cmd=".len()..])?;
            }
            s if s.starts_with('-') && s.len() > 1 => {
                return Err(format!("unknown option '{s}'"));
            }
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    if positional.len() != 2 {
        return Err(format!(
            "expected MOUNTPOINT and pass-name, got {} positional argument(s)",
            positional.len()
        ));
    }

    Ok(Options {
        mountpoint: PathBuf::from(&positional[0]),
        pass_name: positional[1].clone(),
        layout,
        pass_cmd,
    })
}

fn split_command(raw: &str) -> Result<Vec<String>, String> {
    let parts: Vec<String> = raw.split_whitespace().map(String::from).collect();
    if parts.is_empty() {
        return Err("--pass-cmd must not be empty".to_string());
    }
    Ok(parts)
}

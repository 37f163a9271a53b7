//! `kopano-lmtpd`: single-delivery CLI mode (the default, for MTA pipe
//! delivery) and `-l`/`-d` LMTP listener mode (§6).

mod address_book;
mod cli;
mod converter;
mod delivery;
mod serve;
mod store_registry;

use clap::Parser;

use cli::{classify_error, Cli, ExitOutcome};
use kopano_core::config::Config;

fn main() {
    let cli = Cli::parse();
    let code = run(&cli).code(cli.qmail_exit_codes);
    std::process::exit(code);
}

fn run(cli: &Cli) -> ExitOutcome {
    kopano_core::logging::init();

    let mut config = if let Some(path) = &cli.config_path {
        match load_config_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("kopano-lmtpd: {e}");
                return ExitOutcome::Usage;
            }
        }
    } else {
        Config::from_env()
    };
    apply_cli_overrides(&mut config, cli);

    if cli.dump_config {
        for (key, value) in config.dump() {
            println!("{key} = {value}");
        }
        return ExitOutcome::Ok;
    }

    if cli.listen || cli.daemonize {
        return match serve::serve(config) {
            Ok(()) => ExitOutcome::Ok,
            Err(e) => {
                tracing::error!(error = %e, "listener exited with an error");
                classify_error(&e)
            }
        };
    }

    if cli.usernames.is_empty() {
        eprintln!("kopano-lmtpd: single-delivery mode requires at least one recipient username");
        return ExitOutcome::Usage;
    }

    let raw_message = match delivery::read_message(cli) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("kopano-lmtpd: {e}");
            return classify_error(&e);
        }
    };

    match delivery::deliver_to_all(&config, cli, &raw_message) {
        Ok(()) => ExitOutcome::Ok,
        Err(e) => {
            if !cli.silent {
                eprintln!("kopano-lmtpd: delivery failed: {e}");
            }
            classify_error(&e)
        }
    }
}

/// Environment-variable configuration files use `key = value` lines, the
/// same grammar `Config::from_env` reads from the process environment
/// (§ ambient config), so `-c FILE` loads that file into the process
/// environment before delegating to `Config::from_env`.
fn load_config_file(path: &std::path::Path) -> kopano_core::Result<Config> {
    let text = std::fs::read_to_string(path).map_err(kopano_core::Error::Io)?;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            // SAFETY: single-threaded at startup, before any other code
            // reads the environment.
            unsafe {
                std::env::set_var(key.trim(), value.trim());
            }
        }
    }
    let mut config = Config::from_env();
    config.config_path = Some(path.to_path_buf());
    Ok(config)
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(server) = &cli.server_path {
        config.server_path = server.clone();
    }
    if let Some(path) = &cli.autoresponder_path {
        config.autoresponder_path = Some(path.clone());
    }
    config.path_separator = cli.path_separator;
    if cli.create_missing_subfolder {
        config.create_missing_subfolder = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["kopano-lmtpd"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn dump_config_prints_and_exits_ok() {
        let cli = cli(&["--dump-config"]);
        assert_eq!(run(&cli), ExitOutcome::Ok);
    }

    #[test]
    fn single_delivery_mode_without_usernames_is_a_usage_error() {
        let cli = cli(&[]);
        assert_eq!(run(&cli), ExitOutcome::Usage);
    }

    #[test]
    fn overrides_apply_path_separator_from_cli() {
        let mut config = Config::default();
        let cli = cli(&["-p", "/", "alice"]);
        apply_cli_overrides(&mut config, &cli);
        assert_eq!(config.path_separator, '/');
    }
}

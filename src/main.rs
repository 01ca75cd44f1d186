use anyhow::Result;
use clap::Parser;
use wristcall::{
    config::AppConfig, init_debug_log_file, load_registry, log_debug, log_file_path,
    render_contact_list, run_sequence,
};

#[cfg(not(test))]
fn main() -> Result<()> {
    run_with_args(std::env::args_os())
}

#[cfg_attr(test, allow(dead_code))]
fn run_with_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let config = AppConfig::parse_from(args);
    config.validate()?;

    if config.list_contacts {
        let registry = load_registry(&config)?;
        print!("{}", render_contact_list(&registry));
        return Ok(());
    }

    init_debug_log_file();
    log_debug("=== wristcall started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    let result = run_sequence(&config);
    if let Err(ref e) = result {
        log_debug(&format!("Exit with error: {e:#}"));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_contacts_mode_short_circuits() {
        run_with_args(["wristcall", "--list-contacts"]).expect("list mode should succeed");
    }

    #[test]
    fn invalid_timing_is_rejected_before_running() {
        let err = run_with_args(["wristcall", "--ring-timeout-ms", "1"]).unwrap_err();
        assert!(err.to_string().contains("--ring-timeout-ms"));
    }
}

use super::*;
use upretry_core::retry::ResetReason;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).unwrap()
}

#[test]
fn cli_parse_check_config() {
    let cli = parse(&["upretry", "check-config"]);
    assert!(cli.config.is_none());
    assert!(matches!(cli.command, CliCommand::CheckConfig));
}

#[test]
fn cli_parse_global_config_path() {
    let cli = parse(&["upretry", "check-config", "--config", "/tmp/upretry.toml"]);
    assert_eq!(cli.config, Some(PathBuf::from("/tmp/upretry.toml")));
}

#[test]
fn cli_parse_simulate() {
    let cli = parse(&[
        "upretry",
        "simulate",
        "--cluster",
        "payments",
        "-H",
        "x-envoy-retry-on=5xx",
        "--random",
        "49",
        "--random",
        "149",
        "reset:remote-reset",
        "status:503",
    ]);
    match cli.command {
        CliCommand::Simulate {
            cluster,
            headers,
            random,
            high_priority,
            wait,
            signals,
        } => {
            assert_eq!(cluster, "payments");
            assert_eq!(headers, vec!["x-envoy-retry-on=5xx".to_string()]);
            assert_eq!(random, vec![49, 149]);
            assert!(!high_priority);
            assert!(!wait);
            assert_eq!(signals.len(), 2);
            assert_eq!(signals[0], Signal::Reset(ResetReason::RemoteReset));
        }
        _ => panic!("expected Simulate"),
    }
}

#[test]
fn cli_simulate_requires_signals() {
    assert!(Cli::try_parse_from(["upretry", "simulate"]).is_err());
}

#[test]
fn cli_simulate_rejects_bad_signal() {
    assert!(Cli::try_parse_from(["upretry", "simulate", "reset:meteor"]).is_err());
}

use std::fs;

#[test]
fn test_binaries_load_env_before_logging() {
    for path in ["src/main.rs", "src/bin/pause_drill.rs"] {
        let source = fs::read_to_string(path).expect("entrypoint must be readable");
        let guard = source
            .find("harden_env_setup()")
            .unwrap_or_else(|| panic!("{path} must load .env through env_guard"));
        let logging = source
            .find("tracing_subscriber::fmt()")
            .unwrap_or_else(|| panic!("{path} must install the tracing subscriber"));
        assert!(guard < logging, "{path} must read .env before RUST_LOG is consulted");
        assert!(
            source.contains("with_writer(std::io::stderr)"),
            "{path} must keep stdout for results"
        );
    }
}

#[test]
fn test_env_template_is_committed() {
    let template = fs::read_to_string(".env.example").expect(".env.example must exist");
    for key in ["LEDGER_MODE", "ETH_RPC_URL", "ATTACK_KIND", "DEFENSE_ACTION"] {
        assert!(template.contains(key), ".env.example is missing {key}");
    }
}

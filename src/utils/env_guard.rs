use std::fs;
use std::io::Write;
use std::path::Path;

fn write_env_template(file: &mut fs::File) -> std::io::Result<()> {
    writeln!(file, "# Watchtower race harness configuration")?;
    writeln!(file)?;
    writeln!(file, "# offline = in-process ledger, rpc = Hardhat/Anvil node")?;
    writeln!(file, "LEDGER_MODE=\"offline\"")?;
    writeln!(file, "ETH_RPC_URL=\"http://127.0.0.1:8545\"")?;
    writeln!(file, "# TOKEN_ADDRESS, VAULT_ADDRESS, DEX_ADDRESS, RESERVE_TOKEN_ADDRESS (rpc mode)")?;
    writeln!(file)?;
    writeln!(file, "ATTACK_KIND=\"infinite_mint\"")?;
    writeln!(file, "DEFENSE_ACTION=\"pause\"")?;
    writeln!(file, "ITERATIONS=\"5\"")?;
    writeln!(file, "# EXPERIMENT_SEED=\"42\"")?;
    writeln!(file, "EXPORT_DIR=\"./experiment_results\"")?;
    writeln!(file)?;
    writeln!(file, "RUST_LOG=\"info,watchtower_harness=info\"")?;
    Ok(())
}

/// One `KEY=value` line, with quotes and trailing `# comments` stripped.
fn parse_env_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let (key, value) = trimmed.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.split('#').next().unwrap_or("").trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
        .unwrap_or(value);
    Some((key, unquoted))
}

fn load_dot_env(path: &Path) {
    if !path.exists() {
        return;
    }
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ENV] failed to read {}: {}", path.display(), e);
            return;
        }
    };
    for (key, value) in content.lines().filter_map(parse_env_line) {
        // Real environment wins over the file.
        if std::env::var_os(key).is_none() {
            std::env::set_var(key, value);
        }
    }
}

fn ensure_env_example(path: &Path) {
    if path.exists() {
        return;
    }
    if let Ok(mut file) = fs::File::create(path) {
        let _ = write_env_template(&mut file);
    }
}

pub fn harden_env_setup() {
    ensure_env_example(Path::new(".env.example"));
    load_dot_env(Path::new(".env"));
    let mode = std::env::var("LEDGER_MODE").unwrap_or_default();
    if mode.eq_ignore_ascii_case("rpc") && std::env::var("TOKEN_ADDRESS").is_err() {
        eprintln!("[ENV] WARN: LEDGER_MODE=rpc but TOKEN_ADDRESS is not set");
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::*;

fn parse(args: &[&str]) -> anyhow::Result<Config> {
    let mut full = vec!["tether"];
    full.extend_from_slice(args);
    Ok(Config::try_parse_from(full)?)
}

#[test]
fn defaults_parse_and_validate() -> anyhow::Result<()> {
    let config = parse(&[])?;
    config.validate()?;
    assert_eq!(config.port, 8737);
    assert_eq!(config.max_terminals, 12);
    assert_eq!(config.retry_cap, 3);
    assert_eq!(config.queue_capacity, 1000);
    assert!(!config.batch);
    Ok(())
}

#[test]
fn settings_resolve_durations() -> anyhow::Result<()> {
    let config = parse(&[
        "--read-timeout-secs",
        "15",
        "--retry-timeout-secs",
        "2",
        "--batch",
        "--batch-window-ms",
        "25",
    ])?;
    let settings = config.runtime_settings();

    assert_eq!(settings.read_timeout, Duration::from_secs(15));
    assert_eq!(settings.retry_timeout, Duration::from_secs(2));
    let batch = settings.batch.ok_or_else(|| anyhow::anyhow!("batching not enabled"))?;
    assert_eq!(batch.window, Duration::from_millis(25));
    assert_eq!(batch.size, 16);
    Ok(())
}

#[test]
fn invalid_values_rejected() -> anyhow::Result<()> {
    assert!(parse(&["--max-terminals", "0"])?.validate().is_err());
    assert!(parse(&["--shell", "  "])?.validate().is_err());
    assert!(parse(&["--log-format", "xml"])?.validate().is_err());
    assert!(parse(&["--queue-capacity", "0"])?.validate().is_err());
    Ok(())
}

#[test]
fn assistant_settings_flow_through() -> anyhow::Result<()> {
    let config = parse(&[
        "--assistant",
        "aider",
        "--assistant-model",
        "gpt-5",
        "--assistant-file",
        "src/a.rs,src/b.rs",
        "--auto-commit",
    ])?;
    let settings = config.runtime_settings();

    assert_eq!(settings.assistant.model.as_deref(), Some("gpt-5"));
    assert_eq!(settings.assistant.files, vec!["src/a.rs".to_owned(), "src/b.rs".to_owned()]);
    assert!(settings.assistant.auto_commit);
    Ok(())
}

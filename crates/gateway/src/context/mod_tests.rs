// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[tokio::test]
async fn log_preserves_order_and_roles() {
    let ctx = ConversationContext::new("s-1");
    ctx.add_user_message("fix the bug", vec!["src/lib.rs".into()]).await;
    ctx.add_assistant_response("done", vec!["src/lib.rs".into()], vec!["Applied edit".into()])
        .await;
    ctx.add_system_message("assistant restarted").await;

    let recent = ctx.get_recent(10).await;
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].role, Role::User);
    assert_eq!(recent[1].role, Role::Assistant);
    assert_eq!(recent[1].actions, vec!["Applied edit".to_owned()]);
    assert_eq!(recent[2].role, Role::System);
}

#[tokio::test]
async fn get_recent_returns_tail() {
    let ctx = ConversationContext::new("s-2");
    for i in 0..10 {
        ctx.add_user_message(format!("message {i}"), vec![]).await;
    }
    let recent = ctx.get_recent(3).await;
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].content, "message 7");
    assert_eq!(recent[2].content, "message 9");
}

#[tokio::test]
async fn update_file_stats_existing_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("notes.txt");
    tokio::fs::write(&path, b"hello context").await?;

    let ctx = ConversationContext::new("s-3");
    ctx.update_file(&path, FileRole::Active).await;

    let snap = ctx.snapshot().await;
    let record = snap
        .files
        .get(&path.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("file not recorded"))?;
    assert_eq!(record.role, FileRole::Active);
    assert_eq!(record.size, Some(13));
    let fp = record.fingerprint.as_deref().unwrap_or("");
    assert!(fp.starts_with("13-"), "fingerprint: {fp}");
    Ok(())
}

#[tokio::test]
async fn deleted_files_keep_entry_without_stats() {
    let ctx = ConversationContext::new("s-4");
    let path = Path::new("/tmp/gone.rs");
    ctx.update_file(path, FileRole::Deleted).await;

    let snap = ctx.snapshot().await;
    let record = &snap.files[&path.to_string_lossy().into_owned()];
    assert_eq!(record.role, FileRole::Deleted);
    assert!(record.size.is_none() && record.fingerprint.is_none());
}

#[tokio::test]
async fn active_files_cover_active_and_created() {
    let ctx = ConversationContext::new("s-5");
    ctx.update_file(Path::new("/p/a.rs"), FileRole::Active).await;
    ctx.update_file(Path::new("/p/b.rs"), FileRole::Created).await;
    ctx.update_file(Path::new("/p/c.rs"), FileRole::Readonly).await;
    ctx.update_file(Path::new("/p/d.rs"), FileRole::Deleted).await;

    assert_eq!(ctx.get_active_files().await, vec!["/p/a.rs".to_owned(), "/p/b.rs".to_owned()]);
}

#[tokio::test]
async fn usage_accumulates() {
    let ctx = ConversationContext::new("s-6");
    ctx.record_usage(120, 40).await;
    ctx.record_usage(80, 10).await;

    let snap = ctx.snapshot().await;
    assert_eq!(snap.usage.prompt_tokens, 200);
    assert_eq!(snap.usage.completion_tokens, 50);
    assert_eq!(snap.usage.requests, 2);
}

#[tokio::test]
async fn save_and_load_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("snapshots").join("s-7.json");

    let ctx = ConversationContext::new("s-7");
    ctx.add_user_message("persist me", vec![]).await;
    ctx.record_usage(5, 7).await;
    ctx.save(&path).await?;

    // No stray temp file left behind.
    let mut entries = tokio::fs::read_dir(path.parent().unwrap_or(Path::new("."))).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    assert_eq!(names, vec!["s-7.json".to_owned()]);

    let restored = ConversationContext::load_or_new(&path, "s-7");
    let snap = restored.snapshot().await;
    assert_eq!(snap.session_id, "s-7");
    assert_eq!(snap.log.len(), 1);
    assert_eq!(snap.usage.completion_tokens, 7);
    Ok(())
}

#[tokio::test]
async fn load_falls_back_on_garbage() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("s-8.json");
    tokio::fs::write(&path, b"{ not json").await?;

    let ctx = ConversationContext::load_or_new(&path, "s-8");
    let snap = ctx.snapshot().await;
    assert_eq!(snap.session_id, "s-8");
    assert!(snap.log.is_empty());
    Ok(())
}

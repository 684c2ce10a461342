//! Loading a TOML config from disk and bringing up the database it names.

mod common;

use anyhow::Result;
use comment_triage::config::load_config;
use comment_triage::{db, migrate};
use tempfile::TempDir;

fn write_config(tmp: &TempDir, extra: &str) -> Result<std::path::PathBuf> {
    let path = tmp.path().join("triage.toml");
    let body = format!(
        r#"
[db]
path = "{db}"

[vector]
root = "{vectors}"

{extra}
"#,
        db = tmp.path().join("data/triage.sqlite").display(),
        vectors = tmp.path().join("data/vectors").display(),
        extra = extra,
    );
    std::fs::write(&path, body)?;
    Ok(path)
}

#[tokio::test]
async fn test_config_file_drives_database_setup() -> Result<()> {
    common::init_tracing();
    let tmp = TempDir::new()?;
    let path = write_config(
        &tmp,
        r#"
[retrieval]
hybrid_alpha = 0.5
default_top_k = 3

[knowledge]
default_kb_slug = "shop"
"#,
    )?;

    let config = load_config(&path)?;
    assert_eq!(config.retrieval.default_top_k, 3);
    assert_eq!(config.knowledge.default_kb_slug, "shop");

    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;
    // Migrations are re-runnable.
    migrate::run_migrations(&pool).await?;
    assert!(config.db.path.exists());

    let store = comment_triage::knowledge::KnowledgeStore::new(pool, &config.knowledge);
    let kb = store.ensure_default_knowledge_base().await?;
    assert_eq!(kb.slug, "shop");
    Ok(())
}

#[test]
fn test_invalid_backend_fails_to_load() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = write_config(&tmp, "")?;
    let body = std::fs::read_to_string(&path)?.replace(
        "[vector]\n",
        "[vector]\nbackend = \"annoy\"\n",
    );
    std::fs::write(&path, body)?;

    let err = load_config(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("annoy"), "got {:#}", err);
    Ok(())
}

#[test]
fn test_missing_file_reports_path() {
    let err = load_config(std::path::Path::new("/nonexistent/triage.toml")).unwrap_err();
    assert!(format!("{:#}", err).contains("/nonexistent/triage.toml"));
}

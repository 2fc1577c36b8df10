//! Edge dictionary operations

use anyhow::{Context as _, Result};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;

use super::client::{DictionaryItem, ItemOp};
use super::connect;
use crate::logger::{date_filename, purge_files};
use crate::operation::{Arguments, Context, Param};

pub async fn add_entries(ctx: &Context<'_>, args: Arguments) -> Result<bool> {
    let name = args.text(Param::DictionaryName)?;
    let pairs = args.pairs(Param::InputDictionary)?;
    let (client, service) = connect(ctx, &args).await?;
    let dictionary = client.dictionary_id(&service, name).await?;

    ctx.log
        .write_line(&format!("Adding {} entries to dictionary: \"{}\"", pairs.len(), name))?;
    let ops = pairs
        .iter()
        .map(|(key, value)| ItemOp::Upsert {
            item_key: key.clone(),
            item_value: value.clone(),
        })
        .collect();
    client.update_dictionary(&service.id, &dictionary, ops).await
}

pub async fn remove_entries(ctx: &Context<'_>, args: Arguments) -> Result<bool> {
    let name = args.text(Param::DictionaryName)?;
    let keys = args.list(Param::DictionaryItems)?;
    let (client, service) = connect(ctx, &args).await?;
    let dictionary = client.dictionary_id(&service, name).await?;

    ctx.log
        .write_line(&format!("Removing {} entries from dictionary: \"{}\"", keys.len(), name))?;
    client
        .update_dictionary(&service.id, &dictionary, delete_keys(keys.iter()))
        .await
}

pub async fn remove_all(ctx: &Context<'_>, args: Arguments) -> Result<bool> {
    let name = args.text(Param::DictionaryName)?;
    let (client, service) = connect(ctx, &args).await?;
    let dictionary = client.dictionary_id(&service, name).await?;
    let items = client.dictionary_items(&service.id, &dictionary).await?;

    ctx.log
        .write_line(&format!("Removing all {} entries from dictionary: \"{}\"", items.len(), name))?;
    client
        .update_dictionary(&service.id, &dictionary, delete_keys(items.iter().map(|i| &i.item_key)))
        .await
}

/// Delete entries not touched within the configured number of days
pub async fn remove_stale(ctx: &Context<'_>, args: Arguments) -> Result<bool> {
    let name = args.text(Param::DictionaryName)?;
    let (client, service) = connect(ctx, &args).await?;
    let dictionary = client.dictionary_id(&service, name).await?;
    let items = client.dictionary_items(&service.id, &dictionary).await?;

    let cutoff = Utc::now() - Duration::days(i64::from(ctx.settings.stale_after_days));
    let stale: Vec<_> = items.iter().filter(|i| is_stale(i, cutoff)).collect();

    ctx.log.write_line(&format!(
        "Removing {} of {} entries older than {} days from dictionary: \"{}\"",
        stale.len(),
        items.len(),
        ctx.settings.stale_after_days,
        name
    ))?;
    client
        .update_dictionary(&service.id, &dictionary, delete_keys(stale.iter().map(|i| &i.item_key)))
        .await
}

pub async fn backup(ctx: &Context<'_>, args: Arguments) -> Result<bool> {
    let name = args.text(Param::DictionaryName)?;
    let (client, service) = connect(ctx, &args).await?;
    let dictionary = client.dictionary_id(&service, name).await?;
    let items = client.dictionary_items(&service.id, &dictionary).await?;

    if ctx.settings.prune_backups {
        purge_files("csv", &ctx.settings.backup_dir).context("Failed to remove old backups")?;
    }

    let file = backup_path(ctx, name);
    ctx.log.create_output_file(&file)?;
    ctx.log.append_row(&file, ["item_key", "item_value"])?;
    for item in &items {
        ctx.log.append_row(&file, [&item.item_key, &item.item_value])?;
    }
    ctx.log
        .write_line(&format!("Backed up {} entries from dictionary: \"{}\"", items.len(), name))?;
    Ok(true)
}

fn backup_path(ctx: &Context<'_>, name: &str) -> PathBuf {
    ctx.settings
        .backup_dir
        .join(format!("{}_{}.csv", name, date_filename()))
}

fn delete_keys<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<ItemOp> {
    keys.map(|key| ItemOp::Delete { item_key: key.clone() }).collect()
}

/// Last update (else creation) before `cutoff`; entries without a readable
/// timestamp are kept.
fn is_stale(item: &DictionaryItem, cutoff: DateTime<Utc>) -> bool {
    item.updated_at
        .as_deref()
        .or(item.created_at.as_deref())
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc) < cutoff)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastly::testing::{args, mount_service, Fixture};
    use crate::operation::Value;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::fs;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item(updated_at: Option<&str>, created_at: Option<&str>) -> DictionaryItem {
        DictionaryItem {
            item_key: "k".into(),
            item_value: "v".into(),
            created_at: created_at.map(String::from),
            updated_at: updated_at.map(String::from),
        }
    }

    #[test]
    fn staleness_prefers_update_time() {
        let cutoff = Utc::now() - Duration::days(30);
        let recent = Utc::now().to_rfc3339();

        assert!(is_stale(&item(Some("2001-01-01T00:00:00Z"), None), cutoff));
        assert!(!is_stale(&item(Some(&recent), Some("2001-01-01T00:00:00Z")), cutoff));
        assert!(is_stale(&item(None, Some("2001-01-01T00:00:00Z")), cutoff));
        assert!(!is_stale(&item(None, None), cutoff));
        assert!(!is_stale(&item(Some("last tuesday"), None), cutoff));
    }

    async fn mount_items(server: &MockServer, items: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/service/SVC/dictionary/DICT/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(items))
            .mount(server)
            .await;
    }

    async fn expect_patch(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("PATCH"))
            .and(path("/service/SVC/dictionary/DICT/items"))
            .and(body_json(body))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn upserts_input_pairs() {
        let server = MockServer::start().await;
        mount_service(&server).await;
        expect_patch(
            &server,
            json!({"items": [
                {"op": "upsert", "item_key": "a", "item_value": "1"},
                {"op": "upsert", "item_key": "b", "item_value": "2"}
            ]}),
        )
        .await;

        let fx = Fixture::new(&server);
        let pairs = BTreeMap::from([("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
        let args = args(&[
            (Param::DictionaryName, Value::Text("redirects".into())),
            (Param::InputDictionary, Value::Pairs(pairs)),
        ]);

        assert!(add_entries(&fx.ctx(), args).await.unwrap());
        assert!(fx.log_text().contains("Adding 2 entries to dictionary: \"redirects\""));
    }

    #[tokio::test]
    async fn missing_input_is_an_error() {
        let server = MockServer::start().await;
        let fx = Fixture::new(&server);
        let args = args(&[(Param::DictionaryName, Value::Text("redirects".into()))]);

        let err = add_entries(&fx.ctx(), args).await.unwrap_err();
        assert_eq!(err.to_string(), "missing required argument --input_dictionary");
    }

    #[tokio::test]
    async fn removes_listed_keys() {
        let server = MockServer::start().await;
        mount_service(&server).await;
        expect_patch(
            &server,
            json!({"items": [
                {"op": "delete", "item_key": "1234"},
                {"op": "delete", "item_key": "2345"}
            ]}),
        )
        .await;

        let fx = Fixture::new(&server);
        let args = args(&[
            (Param::DictionaryName, Value::Text("redirects".into())),
            (Param::DictionaryItems, Value::List(vec!["1234".into(), "2345".into()])),
        ]);

        assert!(remove_entries(&fx.ctx(), args).await.unwrap());
    }

    #[tokio::test]
    async fn removes_every_listed_item() {
        let server = MockServer::start().await;
        mount_service(&server).await;
        mount_items(
            &server,
            json!([
                {"item_key": "x", "item_value": "1"},
                {"item_key": "y", "item_value": "2"}
            ]),
        )
        .await;
        expect_patch(
            &server,
            json!({"items": [
                {"op": "delete", "item_key": "x"},
                {"op": "delete", "item_key": "y"}
            ]}),
        )
        .await;

        let fx = Fixture::new(&server);
        let args = args(&[(Param::DictionaryName, Value::Text("redirects".into()))]);

        assert!(remove_all(&fx.ctx(), args).await.unwrap());
    }

    #[tokio::test]
    async fn removes_only_stale_items() {
        let server = MockServer::start().await;
        mount_service(&server).await;
        mount_items(
            &server,
            json!([
                {"item_key": "old", "item_value": "1", "updated_at": "2001-01-01T00:00:00Z"},
                {"item_key": "new", "item_value": "2", "updated_at": Utc::now().to_rfc3339()},
                {"item_key": "unknown", "item_value": "3"}
            ]),
        )
        .await;
        expect_patch(&server, json!({"items": [{"op": "delete", "item_key": "old"}]})).await;

        let fx = Fixture::new(&server);
        let args = args(&[(Param::DictionaryName, Value::Text("redirects".into()))]);

        assert!(remove_stale(&fx.ctx(), args).await.unwrap());
        assert!(fx.log_text().contains("Removing 1 of 3 entries older than 30 days"));
    }

    #[tokio::test]
    async fn backup_writes_csv() {
        let server = MockServer::start().await;
        mount_service(&server).await;
        mount_items(
            &server,
            json!([
                {"item_key": "/old", "item_value": "/new"},
                {"item_key": "/a,b", "item_value": "/c"}
            ]),
        )
        .await;

        let fx = Fixture::new(&server);
        let args = args(&[(Param::DictionaryName, Value::Text("redirects".into()))]);

        assert!(backup(&fx.ctx(), args).await.unwrap());

        let file = fx.dir.path().join(format!("redirects_{}.csv", date_filename()));
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "item_key,item_value\n/old,/new\n\"/a,b\",/c\n"
        );

        let notice = format!("Writing Data to: \"{}\"", file.display());
        assert_eq!(fx.log_text().matches(&notice).count(), 1);
    }

    #[tokio::test]
    async fn backup_can_prune_previous_files() {
        let server = MockServer::start().await;
        mount_service(&server).await;
        mount_items(&server, json!([])).await;

        let fx = Fixture::with_env(&server, &[("FASTLY_PRUNE_BACKUPS", "true")]);
        fs::write(fx.dir.path().join("redirects_01.01.2020.csv"), "old").unwrap();
        fs::write(fx.dir.path().join("notes.txt"), "keep").unwrap();
        let args = args(&[(Param::DictionaryName, Value::Text("redirects".into()))]);

        assert!(backup(&fx.ctx(), args).await.unwrap());
        assert!(!fx.dir.path().join("redirects_01.01.2020.csv").exists());
        assert!(fx.dir.path().join("notes.txt").exists());
    }
}

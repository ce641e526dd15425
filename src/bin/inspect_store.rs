use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("Usage: {} [key] [--db <sqlite url>]", args[0]);
        eprintln!("Prints the raw blobs kept by the local storage backend.");
        std::process::exit(1);
    }

    let database_url = args
        .iter()
        .position(|a| a == "--db")
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
        .unwrap_or("sqlite:retroprint.db");
    let key = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with("--") && a.as_str() != database_url);

    let pool = SqlitePoolOptions::new()
        .connect(database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let rows = match key {
        Some(key) => {
            sqlx::query("SELECT key, value, updated_at FROM kv WHERE key = ?")
                .bind(key)
                .fetch_all(&pool)
                .await?
        }
        None => {
            sqlx::query("SELECT key, value, updated_at FROM kv ORDER BY key")
                .fetch_all(&pool)
                .await?
        }
    };

    if rows.is_empty() {
        match key {
            Some(key) => println!("No entry stored under '{}'", key),
            None => println!("Store is empty"),
        }
        return Ok(());
    }

    for row in rows {
        let key: String = row.get("key");
        let value: String = row.get("value");
        let updated_at: i64 = row.get("updated_at");
        let updated = chrono::DateTime::from_timestamp_millis(updated_at)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| updated_at.to_string());

        println!("KEY: {}", key);
        println!("UPDATED: {}", updated);
        println!(
            "--------------------------------------------------------------------------------"
        );
        // Pretty-print when the blob is JSON, otherwise show it raw so corruption is visible.
        match serde_json::from_str::<serde_json::Value>(&value) {
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(err) => {
                println!("(not valid JSON: {})", err);
                println!("{:?}", value);
            }
        }
        println!(
            "--------------------------------------------------------------------------------"
        );
    }

    Ok(())
}

use anyhow::Result;
use callscope::config::{Cli, Command, Config};
use callscope::document::Document;
use callscope::search::{SearchRequest, SessionSearch};
use callscope::store::create_store;
use clap::Parser;
use futures::StreamExt;
use std::fs::File;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.conf {
        Some(ref conf) if std::path::Path::new(conf).exists() => {
            Config::load(conf).expect("Failed to load config")
        }
        _ => Config::default(),
    };

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file).expect("Failed to create log file");
        let (non_blocking, _guard) = tracing_appender::non_blocking(file);
        log_fmt.with_writer(non_blocking).try_init().ok();
    } else {
        log_fmt.try_init().ok();
    }

    let store = create_store(&config.store)?;

    match cli.command {
        Command::Search {
            created_at,
            terminated_at,
            query,
        } => {
            let cancel_token = CancellationToken::new();
            let search = SessionSearch::new(store, config.session.clone())
                .with_cancel_token(cancel_token.clone());
            let mut results = search
                .search(&SearchRequest {
                    created_at,
                    terminated_at,
                    query,
                })
                .await?;

            loop {
                select! {
                    item = results.next() => {
                        match item {
                            Some(Ok(summary)) => println!("{}", serde_json::to_string(&summary)?),
                            Some(Err(err)) => return Err(err.into()),
                            None => break,
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received CTRL+C, stopping search");
                        cancel_token.cancel();
                        break;
                    }
                }
            }
        }
        Command::Import { collection, file } => {
            let content = tokio::fs::read_to_string(&file).await?;
            let mut imported = 0usize;
            for line in content.lines().filter(|line| !line.trim().is_empty()) {
                let value: serde_json::Value = serde_json::from_str(line)?;
                let Some(doc) = Document::from_value(value) else {
                    anyhow::bail!("not a JSON object: {}", line);
                };
                let at_ms = doc
                    .get_i64("created_at")
                    .or_else(|| doc.get_i64("started_at"))
                    .unwrap_or_default();
                store.insert(&collection, at_ms, doc).await?;
                imported += 1;
            }
            info!(imported, collection, "import finished");
        }
    }
    Ok(())
}

//! Command line front end over the sample film database

pub mod commands;
pub mod fixtures;

pub use commands::{Cli, Commands};

use crate::args::{DatomsArgs, IndexRangeArgs, PullArgs, TxRangeArgs};
use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::core::datom::{Datom, EntityId};
use crate::core::statement::{EntityRef, Statement};
use crate::core::value::Value;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::query::parse_selector;
use crate::query::parse_value;
use futures::TryStreamExt;
use serde::Serialize;
use tracing::info;

/// Run one CLI invocation against a freshly seeded film database
pub async fn run(cli: Cli, mut config: ClientConfig) -> Result<()> {
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    let (_client, conn) = fixtures::films(config).await?;
    info!(backend = ?conn.capabilities(), "film database ready");

    if let Commands::Demo = cli.command {
        return demo(&conn).await;
    }
    if let Commands::TxRange { start, end, limit } = cli.command {
        let mut args = TxRangeArgs::new().limit(limit);
        if let Some(start) = start {
            args = args.start(start);
        }
        if let Some(end) = end {
            args = args.end(end);
        }
        let entries: Vec<_> = conn.tx_range(args)?.try_collect().await?;
        if cli.json {
            return print_json(&entries);
        }
        for entry in entries {
            println!("t {} ({} datoms)", entry.t, entry.data.len());
            for datom in &entry.data {
                println!("  {datom}");
            }
        }
        return Ok(());
    }

    let db = view(&conn, &cli).await?;
    match cli.command {
        Commands::Datoms {
            index,
            components,
            limit,
            offset,
        } => {
            let mut args = DatomsArgs::new(index).limit(limit).offset(offset);
            for component in &components {
                args = args.component(parse_value(component)?);
            }
            print_datoms(&db.datoms(args).await?, cli.json)
        }
        Commands::IndexRange {
            attribute,
            start,
            end,
            limit,
            offset,
        } => {
            let mut args = IndexRangeArgs::new(&attribute).limit(limit).offset(offset);
            if let Some(start) = start {
                args = args.start(bound(&start));
            }
            if let Some(end) = end {
                args = args.end(bound(&end));
            }
            print_datoms(&db.index_range(args).await?, cli.json)
        }
        Commands::Pull { entity, pattern } => {
            let map = db
                .pull(PullArgs::new(pattern.as_str(), entity_ref(&entity)?))
                .await?;
            print_json(&map)
        }
        Commands::Stats => {
            let stats = db.db_stats().await?;
            if cli.json {
                return print_json(&stats);
            }
            println!("{} datoms", stats.datoms);
            for (attr, count) in &stats.attrs {
                println!("  {attr:<24} {count}");
            }
            Ok(())
        }
        Commands::Demo | Commands::TxRange { .. } => Ok(()),
    }
}

/// Current view with the global time flags applied
async fn view(conn: &Connection, cli: &Cli) -> Result<Db> {
    let mut db = conn.db().await?;
    if let Some(t) = cli.as_of {
        db = db.as_of(t).await?;
    }
    if let Some(t) = cli.since {
        db = db.since(t).await?;
    }
    if cli.history {
        db = db.history();
    }
    Ok(db)
}

/// Range bound: an EDN scalar, or bare text taken as a string
fn bound(raw: &str) -> Value {
    parse_value(raw).unwrap_or_else(|_| Value::from(raw))
}

fn entity_ref(raw: &str) -> Result<EntityRef> {
    if let Ok(id) = raw.parse::<u64>() {
        return Ok(EntityRef::Id(EntityId(id)));
    }
    if raw.trim_start().starts_with('[') {
        return match parse_selector(raw)?.as_slice() {
            [Value::Keyword(attr), value] => Ok(EntityRef::Lookup(attr.clone(), value.clone())),
            _ => Err(Error::InvalidArgument(format!(
                "lookup ref must be [attribute value], got {raw}"
            ))),
        };
    }
    Ok(EntityRef::from(raw))
}

fn print_datoms(datoms: &[Datom], json: bool) -> Result<()> {
    if json {
        return print_json(&datoms);
    }
    for datom in datoms {
        println!("{datom}");
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn titles(db: &Db) -> Result<Vec<String>> {
    let datoms = db.index_range(IndexRangeArgs::new(":movie/title")).await?;
    Ok(datoms
        .into_iter()
        .filter_map(|d| d.v.as_str().map(str::to_string))
        .collect())
}

async fn demo(conn: &Connection) -> Result<()> {
    let db = conn.db().await?;
    let base_t = db.basis_t();
    println!("basis t {base_t}: {:?}", titles(&db).await?);

    let report = conn.transact(vec![fixtures::film("Film 4")]).await?;
    println!(
        "t {} added Film 4 ({} datoms, first is the tx instant)",
        report.t(),
        report.tx_data().len()
    );

    let now = conn.db().await?;
    println!("now:          {:?}", titles(&now).await?);
    println!("as of t {base_t}:  {:?}", titles(&now.as_of(base_t).await?).await?);
    println!("since t {base_t}:  {:?}", titles(&now.since(base_t).await?).await?);

    let seed = conn.with_db().await?;
    let first = seed.with(vec![fixtures::film("Film 5")]).await?;
    let second = first.db_after().with(vec![fixtures::film("Film 6")]).await?;
    println!("speculative:  {:?}", titles(second.db_after()).await?);
    println!("durable:      {:?}", titles(&conn.db().await?).await?);

    let commando = EntityRef::Lookup(":movie/title".into(), Value::from("Commando"));
    conn.transact(vec![Statement::retract_entity(commando)]).await?;
    let after = conn.db().await?;
    println!("retracted Commando: {:?}", titles(&after).await?);
    let events = after
        .history()
        .index_range(IndexRangeArgs::new(":movie/title").start("Commando").end("Commando!"))
        .await?;
    for datom in events {
        println!("  history {datom}");
    }

    let range = after
        .index_range(IndexRangeArgs::new(":movie/title").start("D"))
        .await?;
    println!("titles from \"D\": {}", range.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Keyword;

    #[test]
    fn test_entity_ref_forms() {
        assert_eq!(entity_ref("1001").unwrap(), EntityRef::Id(EntityId(1001)));
        assert_eq!(
            entity_ref(":movie/title").unwrap(),
            EntityRef::Ident(Keyword::new("movie/title"))
        );
        assert_eq!(
            entity_ref("[:movie/title \"Commando\"]").unwrap(),
            EntityRef::Lookup(Keyword::new("movie/title"), Value::from("Commando"))
        );
        assert!(entity_ref("[:movie/title]").is_err());
    }

    #[test]
    fn test_bound_falls_back_to_text() {
        assert_eq!(bound("1985"), Value::Long(1985));
        assert_eq!(bound("\"D\""), Value::from("D"));
        assert_eq!(bound("D"), Value::from("D"));
    }

    #[tokio::test]
    async fn test_demo_runs_on_both_backends() {
        for backend in ["in-process", "emulated-remote"] {
            let cli = Cli {
                backend: Some(backend.parse().unwrap()),
                as_of: None,
                since: None,
                history: false,
                json: false,
                command: Commands::Demo,
            };
            run(cli, ClientConfig::default()).await.unwrap();
        }
    }
}

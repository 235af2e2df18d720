//! Sample film database used by the CLI

use crate::client::Client;
use crate::config::{BackendKind, ClientConfig};
use crate::connection::Connection;
use crate::core::schema::{AttributeSpec, Cardinality, Unique};
use crate::core::statement::Statement;
use crate::core::value::ValueType;
use crate::error::Result;
use crate::service::LocalService;
use std::sync::Arc;

pub const FILMS_DB: &str = "films";

/// Title, genre and release year. Title is a unique identity and year
/// carries a value index, so AVET scans work on every backend.
pub fn film_schema() -> Vec<Statement> {
    vec![
        AttributeSpec::new(":movie/title", ValueType::String, Cardinality::One)
            .doc("The title of the movie")
            .unique(Unique::Identity)
            .into(),
        AttributeSpec::new(":movie/genre", ValueType::String, Cardinality::One)
            .doc("The genre of the movie")
            .into(),
        AttributeSpec::new(":movie/release-year", ValueType::Long, Cardinality::One)
            .doc("The year the movie was released in theaters")
            .indexed()
            .into(),
    ]
}

pub fn film_data() -> Vec<Statement> {
    [
        ("The Goonies", "action/adventure", 1985),
        ("Commando", "thriller/action", 1985),
        ("Repo Man", "punk dystopia", 1984),
    ]
    .into_iter()
    .map(|(title, genre, year)| {
        Statement::entity()
            .attr(":movie/title", title)
            .attr(":movie/genre", genre)
            .attr(":movie/release-year", year as i64)
            .into()
    })
    .collect()
}

/// Statement adding a film with only a title
pub fn film(title: &str) -> Statement {
    Statement::entity().attr(":movie/title", title).into()
}

/// Client over a fresh local service holding the film database, with schema
/// and data committed as two transactions
pub async fn films(config: ClientConfig) -> Result<(Client, Connection)> {
    let service = match config.backend {
        BackendKind::InProcess => LocalService::in_process(),
        BackendKind::EmulatedRemote => LocalService::remote_peer(),
    };
    service.provision(FILMS_DB).await?;
    let client = Client::with_config(Arc::new(service), config);
    let conn = client.connect(FILMS_DB).await?;
    conn.transact(film_schema()).await?;
    conn.transact(film_data()).await?;
    Ok((client, conn))
}

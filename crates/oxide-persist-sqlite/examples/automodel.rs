//! Registers two entities, brings the schema up to date and runs CRUD.
//!
//! ```text
//! cargo run -p oxide-persist-sqlite --example automodel
//! ```

use oxide_persist::{Mapper, SqliteDialect};
use oxide_persist_derive::Entity;
use oxide_persist_sqlite::{SqliteConfig, SqliteExecutor};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Default, Entity)]
struct GroupInfo {
    #[field(autoincrement)]
    id: i64,
    #[field(size = 80, unique)]
    name: String,
}

#[derive(Debug, Default, Entity)]
struct ContactInfo {
    #[field(autoincrement)]
    id: i64,
    #[field(size = 40, indexed)]
    first_name: String,
    #[field(size = 40)]
    last_name: String,
    email: Option<String>,
    fk_group: i64,
    created: chrono::NaiveDateTime,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let executor = SqliteExecutor::connect(&SqliteConfig::memory()).await?;
    let mut mapper = Mapper::new(executor, SqliteDialect)
        .register::<GroupInfo>()?
        .register::<ContactInfo>()?;

    for (table, outcome) in mapper.update_model().await? {
        info!(table = %table, ?outcome, "Migrated");
    }

    let mut group = GroupInfo {
        id: 0,
        name: "engineers".into(),
    };
    mapper.insert(&mut group).await?;

    let mut contact = ContactInfo {
        id: 0,
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        email: None,
        fk_group: group.id,
        created: chrono::Utc::now().naive_utc(),
    };
    mapper.insert(&mut contact).await?;

    contact.email = Some("ada@example.com".into());
    mapper.update(&contact).await?;

    let loaded: ContactInfo = mapper.find(contact.id).await?;
    info!(?loaded, "Loaded contact");

    mapper.delete(&contact).await?;
    info!(up_to_date = mapper.is_up_to_date().await?, "Done");
    Ok(())
}

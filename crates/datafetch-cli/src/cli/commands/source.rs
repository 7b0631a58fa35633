//! `datafetch source ...` – manage data sources.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use datafetch_core::task_db::{
    Credentials, NewDataSource, Protocol, SourceId, SourcePatch, TaskDb,
};

#[derive(Debug, Subcommand)]
pub enum SourceCommand {
    /// Register a data source.
    Add {
        /// Unique name.
        name: String,
        /// URL of a file or a directory listing.
        url: String,
        /// Transfer protocol: http, ftp or sftp.
        #[arg(long, default_value = "http")]
        protocol: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long, requires = "username")]
        password: Option<String>,
    },

    /// List data sources.
    List,

    /// Change fields of a data source; unspecified fields are kept.
    Update(SourceUpdate),

    /// Allow new tasks of this source to be dispatched.
    Enable { id: SourceId },

    /// Make tasks of this source fail at dispatch.
    Disable { id: SourceId },

    /// Delete a data source.
    Remove { id: SourceId },
}

#[derive(Debug, Args)]
pub struct SourceUpdate {
    pub id: SourceId,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub url: Option<String>,
    /// Transfer protocol: http, ftp or sftp.
    #[arg(long)]
    pub protocol: Option<String>,
    /// New description; an empty value clears it.
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long, requires = "username")]
    pub password: Option<String>,
    /// Drop the stored credentials.
    #[arg(long, conflicts_with = "username")]
    pub no_auth: bool,
}

impl SourceUpdate {
    pub fn to_patch(&self) -> Result<SourcePatch> {
        let protocol = match &self.protocol {
            Some(p) => Some(p.parse::<Protocol>()?),
            None => None,
        };
        let credentials = if self.no_auth {
            Some(None)
        } else {
            self.username.clone().map(|username| {
                Some(Credentials {
                    username,
                    password: self.password.clone(),
                })
            })
        };
        Ok(SourcePatch {
            name: self.name.clone(),
            url: self.url.clone(),
            description: self
                .description
                .clone()
                .map(|d| Some(d).filter(|d| !d.is_empty())),
            protocol,
            credentials,
        })
    }
}

pub async fn run_source(db: &TaskDb, cmd: SourceCommand) -> Result<()> {
    match cmd {
        SourceCommand::Add {
            name,
            url,
            protocol,
            description,
            username,
            password,
        } => {
            let protocol: Protocol = protocol.parse()?;
            let credentials = username.map(|username| Credentials { username, password });
            let id = db
                .add_source(&NewDataSource {
                    name: name.clone(),
                    url,
                    description,
                    protocol,
                    credentials,
                })
                .await?;
            println!("Added source {id} ({name}, {protocol})");
        }
        SourceCommand::List => {
            let sources = db.list_sources().await?;
            if sources.is_empty() {
                println!("No data sources.");
                return Ok(());
            }
            println!("{:<6} {:<16} {:<6} {:<8} {}", "ID", "NAME", "PROTO", "ACTIVE", "URL");
            for s in sources {
                println!(
                    "{:<6} {:<16} {:<6} {:<8} {}",
                    s.id,
                    s.name,
                    s.protocol.to_string(),
                    if s.active { "yes" } else { "no" },
                    s.url
                );
            }
        }
        SourceCommand::Update(update) => {
            let patch = update.to_patch()?;
            if patch.is_empty() {
                bail!("nothing to update; pass at least one field");
            }
            if !db.update_source(update.id, &patch).await? {
                bail!("data source {} not found", update.id);
            }
            println!("Updated source {}", update.id);
        }
        SourceCommand::Enable { id } => set_active(db, id, true).await?,
        SourceCommand::Disable { id } => set_active(db, id, false).await?,
        SourceCommand::Remove { id } => {
            if !db.remove_source(id).await? {
                bail!("data source {id} not found");
            }
            println!("Removed source {id}");
        }
    }
    Ok(())
}

async fn set_active(db: &TaskDb, id: SourceId, active: bool) -> Result<()> {
    if !db.set_source_active(id, active).await? {
        bail!("data source {id} not found");
    }
    println!("Source {id} {}", if active { "enabled" } else { "disabled" });
    Ok(())
}

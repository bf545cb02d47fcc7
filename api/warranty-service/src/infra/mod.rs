use crate::config::environment::AppConfig;
use mongodb::bson::Document;
use mongodb::options::IndexOptions;
use mongodb::Client as MongoClient;
use mongodb::{Database, IndexModel};

pub const OPERATORS_COLLECTION: &str = "operators";
pub const AGENTS_COLLECTION: &str = "agents";
pub const POLICIES_COLLECTION: &str = "policies";
pub const RUNS_COLLECTION: &str = "runs";
pub const CLAIMS_COLLECTION: &str = "claims";
pub const SNAPSHOTS_COLLECTION: &str = "reputation_snapshots";

#[derive(Debug, Clone)]
pub struct InfraClients {
    pub mongo_db: Database,
}

pub async fn init_infra(config: &AppConfig) -> Result<Option<InfraClients>, String> {
    let Some(mongo_url) = &config.mongodb_url else {
        return Ok(None);
    };
    let Some(mongo_db_name) = &config.mongodb_database else {
        return Ok(None);
    };

    let mongo_client = MongoClient::with_uri_str(mongo_url)
        .await
        .map_err(|e| format!("mongodb client init failed: {e}"))?;
    let mongo_db = mongo_client.database(mongo_db_name);
    ensure_indexes(&mongo_db).await?;
    Ok(Some(InfraClients { mongo_db }))
}

async fn ensure_indexes(db: &Database) -> Result<(), String> {
    let unique = IndexOptions::builder().unique(true).build();
    let keyed = [
        (OPERATORS_COLLECTION, "operator_id"),
        (AGENTS_COLLECTION, "agent_id"),
        (POLICIES_COLLECTION, "policy_id"),
        (RUNS_COLLECTION, "run_id"),
        (CLAIMS_COLLECTION, "claim_id"),
        (CLAIMS_COLLECTION, "run_id"),
        (SNAPSHOTS_COLLECTION, "snapshot_id"),
    ];

    for (collection, key) in keyed {
        let mut keys = Document::new();
        keys.insert(key, 1);
        let index = IndexModel::builder()
            .keys(keys)
            .options(unique.clone())
            .build();
        db.collection::<Document>(collection)
            .create_index(index)
            .await
            .map_err(|e| format!("mongodb index creation on {collection}.{key} failed: {e}"))?;
    }
    Ok(())
}

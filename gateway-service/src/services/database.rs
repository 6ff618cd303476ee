//! MongoDB credential store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use mongodb::options::{IndexOptions, ReplaceOptions};
use mongodb::{Client as MongoClient, Collection, Database, IndexModel};
use service_core::error::AppError;

use crate::models::{ApiKey, CompanyMembership, ManagementEdge, RefreshToken, User};
use crate::services::security_audit::SecurityEvent;
use crate::services::store::CredentialStore;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for gateway-service");

        let email_index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .name("user_email_lookup".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.users()
            .create_index(email_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create email index on users collection: {}", e);
                AppError::from(e)
            })?;

        let key_owner_index = IndexModel::builder()
            .keys(doc! { "owner_user_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("api_key_owner_lookup".to_string())
                    .build(),
            )
            .build();
        self.api_keys()
            .create_index(key_owner_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create owner index on api_keys collection: {}", e);
                AppError::from(e)
            })?;

        let edge_manager_index = IndexModel::builder()
            .keys(doc! { "manager_user_id": 1, "state": 1 })
            .options(
                IndexOptions::builder()
                    .name("edge_manager_lookup".to_string())
                    .build(),
            )
            .build();
        self.management_edges()
            .create_index(edge_manager_index, None)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create manager index on management_edges collection: {}",
                    e
                );
                AppError::from(e)
            })?;

        let membership_user_index = IndexModel::builder()
            .keys(doc! { "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("membership_user_lookup".to_string())
                    .build(),
            )
            .build();
        self.company_memberships()
            .create_index(membership_user_index, None)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create user index on company_memberships collection: {}",
                    e
                );
                AppError::from(e)
            })?;

        Ok(())
    }

    fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    fn api_keys(&self) -> Collection<ApiKey> {
        self.db.collection("api_keys")
    }

    fn refresh_tokens(&self) -> Collection<RefreshToken> {
        self.db.collection("refresh_tokens")
    }

    fn management_edges(&self) -> Collection<ManagementEdge> {
        self.db.collection("management_edges")
    }

    fn company_memberships(&self) -> Collection<CompanyMembership> {
        self.db.collection("company_memberships")
    }

    fn security_events(&self) -> Collection<SecurityEvent> {
        self.db.collection("security_events")
    }
}

#[async_trait]
impl CredentialStore for MongoDb {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, anyhow::Error> {
        Ok(self.users().find_one(doc! { "_id": user_id }, None).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        Ok(self.users().find_one(doc! { "email": email }, None).await?)
    }

    async fn insert_user(&self, user: &User) -> Result<(), anyhow::Error> {
        self.users().insert_one(user, None).await?;
        Ok(())
    }

    async fn insert_api_key(&self, key: &ApiKey) -> Result<(), anyhow::Error> {
        self.api_keys().insert_one(key, None).await?;
        Ok(())
    }

    async fn find_api_key(&self, key_id: &str) -> Result<Option<ApiKey>, anyhow::Error> {
        Ok(self
            .api_keys()
            .find_one(doc! { "_id": key_id }, None)
            .await?)
    }

    async fn find_api_keys_by_owner(
        &self,
        owner_user_id: &str,
    ) -> Result<Vec<ApiKey>, anyhow::Error> {
        let mut cursor = self
            .api_keys()
            .find(doc! { "owner_user_id": owner_user_id }, None)
            .await?;
        let mut keys = Vec::new();
        while cursor.advance().await? {
            keys.push(cursor.deserialize_current()?);
        }
        Ok(keys)
    }

    async fn touch_api_key(
        &self,
        key_id: &str,
        used_at: DateTime<Utc>,
        ip: &str,
    ) -> Result<(), anyhow::Error> {
        // Dates are stored in chrono's serde shape, so the update writes the
        // same shape the models deserialize from
        let used_at = mongodb::bson::to_bson(&used_at)?;
        self.api_keys()
            .update_one(
                doc! { "_id": key_id },
                doc! { "$set": {
                    "last_used_at": used_at,
                    "last_used_ip": ip,
                }},
                None,
            )
            .await?;
        Ok(())
    }

    async fn set_api_key_active(
        &self,
        key_id: &str,
        active: bool,
        reason: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        let update = match reason {
            Some(reason) => doc! { "$set": { "active": active, "disabled_reason": reason } },
            None => doc! { "$set": { "active": active }, "$unset": { "disabled_reason": "" } },
        };
        self.api_keys()
            .update_one(doc! { "_id": key_id }, update, None)
            .await?;
        Ok(())
    }

    async fn update_api_key_permissions(
        &self,
        key_id: &str,
        permissions: &[String],
    ) -> Result<(), anyhow::Error> {
        self.api_keys()
            .update_one(
                doc! { "_id": key_id },
                doc! { "$set": { "permissions": permissions.to_vec() } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn insert_refresh_token(&self, token: &RefreshToken) -> Result<(), anyhow::Error> {
        // Upsert keyed by the token value itself
        self.refresh_tokens()
            .replace_one(
                doc! { "_id": &token.token },
                token,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshToken>, anyhow::Error> {
        Ok(self
            .refresh_tokens()
            .find_one(doc! { "_id": token }, None)
            .await?)
    }

    async fn invalidate_refresh_tokens(&self, token: &str) -> Result<u64, anyhow::Error> {
        let result = self
            .refresh_tokens()
            .update_many(
                doc! { "_id": token },
                doc! { "$set": { "valid": false } },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn sweep_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        // Invalidated rows go by query; expiry is compared in code because
        // timestamps are stored in chrono's serde shape
        let mut removed = self
            .refresh_tokens()
            .delete_many(doc! { "valid": false }, None)
            .await?
            .deleted_count;

        let mut cursor = self.refresh_tokens().find(doc! {}, None).await?;
        let mut expired = Vec::new();
        while cursor.advance().await? {
            let token: RefreshToken = cursor.deserialize_current()?;
            if token.expires_at < now {
                expired.push(token.token);
            }
        }
        if !expired.is_empty() {
            removed += self
                .refresh_tokens()
                .delete_many(doc! { "_id": { "$in": expired } }, None)
                .await?
                .deleted_count;
        }

        Ok(removed)
    }

    async fn insert_management_edge(&self, edge: &ManagementEdge) -> Result<(), anyhow::Error> {
        self.management_edges().insert_one(edge, None).await?;
        Ok(())
    }

    async fn find_accepted_edges_for_manager(
        &self,
        manager_user_id: &str,
    ) -> Result<Vec<ManagementEdge>, anyhow::Error> {
        let mut cursor = self
            .management_edges()
            .find(
                doc! { "manager_user_id": manager_user_id, "state": "accepted" },
                None,
            )
            .await?;
        let mut edges = Vec::new();
        while cursor.advance().await? {
            edges.push(cursor.deserialize_current()?);
        }
        Ok(edges)
    }

    async fn insert_company_membership(
        &self,
        membership: &CompanyMembership,
    ) -> Result<(), anyhow::Error> {
        self.company_memberships().insert_one(membership, None).await?;
        Ok(())
    }

    async fn find_company_memberships(
        &self,
        user_id: &str,
    ) -> Result<Vec<CompanyMembership>, anyhow::Error> {
        let mut cursor = self
            .company_memberships()
            .find(doc! { "user_id": user_id }, None)
            .await?;
        let mut memberships = Vec::new();
        while cursor.advance().await? {
            memberships.push(cursor.deserialize_current()?);
        }
        Ok(memberships)
    }

    async fn insert_security_event(&self, event: &SecurityEvent) -> Result<(), anyhow::Error> {
        self.security_events().insert_one(event, None).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }
}

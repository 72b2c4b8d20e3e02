use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument},
    Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use super::error::ServiceError;
use crate::utils::{Clock, SystemClock};
use super::store::{LinkEffect, RevocationStore, RoleStore, SetUpdate, UserStore};
use crate::models::{
    LegacyRole, LinkPurpose, RefreshCredential, RevocationRecord, Role, SingleUseLink, User,
};

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
    clock: Arc<dyn Clock>,
}

fn bson_now(now: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_chrono(now)
}

fn to_bson<T: serde::Serialize>(value: &T) -> Result<Bson, ServiceError> {
    bson::to_bson(value).map_err(|e| ServiceError::Internal(anyhow::anyhow!("BSON encode failed: {}", e)))
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref e)) => e.code == 11000,
        _ => false,
    }
}

/// Update document for a string-set change on `field`.
fn set_update_doc(field: &str, update: SetUpdate, now: DateTime<Utc>) -> Document {
    let now = bson_now(now);
    match update {
        SetUpdate::Add(values) => doc! {
            "$addToSet": { field: { "$each": values } },
            "$set": { "updated_at": now },
        },
        SetUpdate::Remove(values) => doc! {
            "$pullAll": { field: values },
            "$set": { "updated_at": now },
        },
        SetUpdate::Replace(values) => {
            let mut deduped = Vec::new();
            SetUpdate::Add(values).apply(&mut deduped);
            doc! { "$set": { field: deduped, "updated_at": now } }
        }
    }
}

fn return_after() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self {
            client,
            db,
            clock: Arc::new(SystemClock),
        })
    }

    /// Take `updated_at` stamps from `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for auth-engine");

        let email_index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("email_unique".to_string())
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
        tracing::info!("Created unique index on users.email");

        let key_index = IndexModel::builder()
            .keys(doc! { "key": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("role_key_unique".to_string())
                    .build(),
            )
            .build();
        self.roles()
            .create_index(key_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create key index on roles collection: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created unique index on roles.key");

        let revocations = self.revocations();
        let revocation_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "token_hash": 1 })
                .options(
                    IndexOptions::builder()
                        .name("token_hash_lookup".to_string())
                        .build(),
                )
                .build(),
            IndexModel::builder()
                .keys(doc! { "owner_id": 1 })
                .options(
                    IndexOptions::builder()
                        .name("owner_id_lookup".to_string())
                        .build(),
                )
                .build(),
            // Server-side purge once expires_at passes; the sweeper covers the lag.
            IndexModel::builder()
                .keys(doc! { "expires_at": 1 })
                .options(
                    IndexOptions::builder()
                        .name("expires_at_ttl".to_string())
                        .expire_after(StdDuration::from_secs(0))
                        .build(),
                )
                .build(),
        ];
        revocations
            .create_indexes(revocation_indexes, None)
            .await
            .map_err(|e| {
                tracing::error!(
                    "Failed to create indexes on token_revocations collection: {}",
                    e
                );
                AppError::from(e)
            })?;
        tracing::info!("Created indexes on token_revocations (token_hash, owner_id, expires_at TTL)");

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    pub fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    pub fn roles(&self) -> Collection<Role> {
        self.db.collection("roles")
    }

    pub fn revocations(&self) -> Collection<RevocationRecord> {
        self.db.collection("token_revocations")
    }

    async fn set_user_fields(&self, user_id: &str, fields: Document) -> Result<bool, ServiceError> {
        let mut fields = fields;
        fields.insert("updated_at", bson_now(self.clock.now()));
        let result = self
            .users()
            .update_one(doc! { "_id": user_id }, doc! { "$set": fields }, None)
            .await?;
        Ok(result.matched_count > 0)
    }
}

#[async_trait]
impl UserStore for MongoDb {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.users().find_one(doc! { "_id": user_id }, None).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.users().find_one(doc! { "email": email }, None).await?)
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        match self.users().insert_one(user, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(ServiceError::Conflict("Email already registered".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_refresh_credential(
        &self,
        user_id: &str,
        credential: Option<RefreshCredential>,
    ) -> Result<bool, ServiceError> {
        match credential {
            Some(credential) => {
                self.set_user_fields(user_id, doc! { "refresh_token": to_bson(&credential)? })
                    .await
            }
            None => {
                let result = self
                    .users()
                    .update_one(
                        doc! { "_id": user_id },
                        doc! {
                            "$unset": { "refresh_token": "" },
                            "$set": { "updated_at": bson_now(self.clock.now()) },
                        },
                        None,
                    )
                    .await?;
                Ok(result.matched_count > 0)
            }
        }
    }

    async fn swap_refresh_credential(
        &self,
        user_id: &str,
        expected_hash: &str,
        next: RefreshCredential,
    ) -> Result<bool, ServiceError> {
        let result = self
            .users()
            .update_one(
                doc! { "_id": user_id, "refresh_token.token_hash": expected_hash },
                doc! {
                    "$set": {
                        "refresh_token": to_bson(&next)?,
                        "updated_at": bson_now(self.clock.now()),
                    }
                },
                None,
            )
            .await?;
        Ok(result.modified_count > 0)
    }

    async fn set_single_use_link(
        &self,
        user_id: &str,
        link: SingleUseLink,
    ) -> Result<bool, ServiceError> {
        self.set_user_fields(user_id, doc! { "single_use_link": to_bson(&link)? })
            .await
    }

    async fn take_single_use_link(
        &self,
        email: &str,
        token_hash: &str,
        purpose: LinkPurpose,
        now: DateTime<Utc>,
        effect: LinkEffect,
    ) -> Result<Option<User>, ServiceError> {
        let filter = doc! {
            "email": email,
            "single_use_link.token_hash": token_hash,
            "single_use_link.purpose": purpose.as_str(),
            "single_use_link.expires_at": { "$gte": bson_now(now) },
        };

        let update = match effect {
            LinkEffect::MarkEmailVerified => doc! {
                "$unset": { "single_use_link": "" },
                "$set": { "is_email_verified": true, "updated_at": bson_now(self.clock.now()) },
            },
            LinkEffect::ReplacePassword(password_hash) => doc! {
                "$unset": { "single_use_link": "", "refresh_token": "" },
                "$set": { "password_hash": password_hash, "updated_at": bson_now(self.clock.now()) },
            },
        };

        Ok(self
            .users()
            .find_one_and_update(filter, update, return_after())
            .await?)
    }

    async fn set_legacy_role(
        &self,
        user_id: &str,
        role: LegacyRole,
    ) -> Result<bool, ServiceError> {
        self.set_user_fields(user_id, doc! { "role": role.as_str() })
            .await
    }

    async fn update_direct_permissions(
        &self,
        user_id: &str,
        update: SetUpdate,
    ) -> Result<Option<User>, ServiceError> {
        Ok(self
            .users()
            .find_one_and_update(
                doc! { "_id": user_id },
                set_update_doc("permissions", update, self.clock.now()),
                return_after(),
            )
            .await?)
    }

    async fn update_assigned_roles(
        &self,
        user_id: &str,
        update: SetUpdate,
    ) -> Result<Option<User>, ServiceError> {
        Ok(self
            .users()
            .find_one_and_update(
                doc! { "_id": user_id },
                set_update_doc("roles", update, self.clock.now()),
                return_after(),
            )
            .await?)
    }
}

#[async_trait]
impl RoleStore for MongoDb {
    async fn find_role_by_id(&self, role_id: &str) -> Result<Option<Role>, ServiceError> {
        Ok(self.roles().find_one(doc! { "_id": role_id }, None).await?)
    }

    async fn find_role_by_key(&self, key: &str) -> Result<Option<Role>, ServiceError> {
        Ok(self.roles().find_one(doc! { "key": key }, None).await?)
    }

    async fn find_roles_by_ids(&self, role_ids: &[String]) -> Result<Vec<Role>, ServiceError> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self
            .roles()
            .find(doc! { "_id": { "$in": role_ids.to_vec() } }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_default_role(&self) -> Result<Option<Role>, ServiceError> {
        Ok(self
            .roles()
            .find_one(doc! { "is_default": true }, None)
            .await?)
    }

    async fn list_roles(&self) -> Result<Vec<Role>, ServiceError> {
        let options = mongodb::options::FindOptions::builder()
            .sort(doc! { "key": 1 })
            .build();
        let cursor = self.roles().find(doc! {}, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count_roles(&self) -> Result<u64, ServiceError> {
        Ok(self.roles().count_documents(doc! {}, None).await?)
    }

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError> {
        match self.roles().insert_one(role, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(ServiceError::Conflict(format!(
                "Role with key '{}' already exists",
                role.key
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_default_flag(&self, except_id: &str) -> Result<u64, ServiceError> {
        let result = self
            .roles()
            .update_many(
                doc! { "_id": { "$ne": except_id }, "is_default": true },
                doc! { "$set": { "is_default": false, "updated_at": bson_now(self.clock.now()) } },
                None,
            )
            .await?;
        Ok(result.modified_count)
    }

    async fn replace_role(&self, role: &Role) -> Result<bool, ServiceError> {
        let result = self
            .roles()
            .replace_one(doc! { "_id": &role.id }, role, None)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    ServiceError::Conflict(format!("Role with key '{}' already exists", role.key))
                } else {
                    e.into()
                }
            })?;
        Ok(result.matched_count > 0)
    }

    async fn update_role_permissions(
        &self,
        role_id: &str,
        update: SetUpdate,
    ) -> Result<Option<Role>, ServiceError> {
        Ok(self
            .roles()
            .find_one_and_update(
                doc! { "_id": role_id },
                set_update_doc("permissions", update, self.clock.now()),
                return_after(),
            )
            .await?)
    }

    async fn delete_role(&self, role_id: &str) -> Result<bool, ServiceError> {
        let result = self.roles().delete_one(doc! { "_id": role_id }, None).await?;
        Ok(result.deleted_count > 0)
    }
}

#[async_trait]
impl RevocationStore for MongoDb {
    async fn insert_revocation(&self, record: &RevocationRecord) -> Result<(), ServiceError> {
        self.revocations().insert_one(record, None).await?;
        Ok(())
    }

    async fn is_hash_revoked(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let record = self
            .revocations()
            .find_one(
                doc! { "token_hash": token_hash, "expires_at": { "$gt": bson_now(now) } },
                None,
            )
            .await?;
        Ok(record.is_some())
    }

    async fn annotate_owner_revocations(
        &self,
        owner_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let result = self
            .revocations()
            .update_many(
                doc! { "owner_id": owner_id, "expires_at": { "$gt": bson_now(now) } },
                doc! { "$set": { "reason": reason } },
                None,
            )
            .await?;
        Ok(result.matched_count)
    }

    async fn delete_expired_revocations(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let result = self
            .revocations()
            .delete_many(doc! { "expires_at": { "$lte": bson_now(now) } }, None)
            .await?;
        Ok(result.deleted_count)
    }
}

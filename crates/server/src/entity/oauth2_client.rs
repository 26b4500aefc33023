//! OAuth2 client registration entity.

use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth2_client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Shared secret (None or empty for public clients)
    pub secret: Option<String>,
    /// Newline-joined list of allowed redirect URIs
    pub redirect_uris: String,
    /// Opaque data attached to the client, usually its metadata document
    pub user_data: Option<Vec<u8>>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn redirect_uris_list(&self) -> Vec<String> {
        self.redirect_uris
            .lines()
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
            .map(String::from)
            .collect()
    }
}

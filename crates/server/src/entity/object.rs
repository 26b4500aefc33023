//! Stored identity objects, activities and links.

use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "object")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub iri: String,
    /// Discriminant of the stored item (`actor`, `activity`, ...)
    pub kind: String,
    /// Vocabulary type (`Person`, `Application`, `Create`, ...)
    pub object_type: String,
    pub name: Option<String>,
    /// Collection the item was appended to, e.g. an outbox
    pub collection: Option<String>,
    pub attributed_to: Option<String>,
    /// Full JSON encoding of the item
    #[sea_orm(column_type = "Text")]
    pub raw: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

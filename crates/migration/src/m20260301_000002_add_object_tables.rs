//! Migration adding identity object storage.
//!
//! Creates tables for:
//! - object: identity objects, activities and links keyed by their IRI
//! - credential: Argon2 password hashes per identity
//! - actor_key: PKCS#8 private keys per identity

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Object::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Object::Iri).string().not_null().primary_key())
                    .col(ColumnDef::new(Object::Kind).string().not_null())
                    .col(ColumnDef::new(Object::ObjectType).string().not_null())
                    .col(ColumnDef::new(Object::Name).string().null())
                    .col(ColumnDef::new(Object::Collection).string().null())
                    .col(ColumnDef::new(Object::AttributedTo).string().null())
                    .col(ColumnDef::new(Object::Raw).text().not_null())
                    .col(
                        ColumnDef::new(Object::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Object::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_object_kind_name")
                    .table(Object::Table)
                    .col(Object::Kind)
                    .col(Object::Name)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_object_collection")
                    .table(Object::Table)
                    .col(Object::Collection)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Credential::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Credential::Iri)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Credential::PasswordHash).string().not_null())
                    .col(
                        ColumnDef::new(Credential::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ActorKey::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ActorKey::Iri)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ActorKey::PrivateKeyPem).text().not_null())
                    .col(
                        ColumnDef::new(ActorKey::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ActorKey::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Credential::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Object::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Object {
    Table,
    Iri,
    Kind,
    ObjectType,
    Name,
    Collection,
    AttributedTo,
    Raw,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Credential {
    Table,
    Iri,
    PasswordHash,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ActorKey {
    Table,
    Iri,
    PrivateKeyPem,
    CreatedAt,
}

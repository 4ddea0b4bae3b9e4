//! Initial schema: `entries`, `entries_meta`, `passwords`, `database_meta`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entries::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Entries::Path).string().not_null().primary_key())
                    .col(ColumnDef::new(Entries::Hash).string().not_null())
                    .col(ColumnDef::new(Entries::EntryType).integer().not_null())
                    .col(ColumnDef::new(Entries::Properties).text().not_null())
                    .col(ColumnDef::new(Entries::Mtime).big_integer().not_null())
                    .col(ColumnDef::new(Entries::Size).big_integer().not_null())
                    .col(ColumnDef::new(Entries::Depth).integer().not_null())
                    .col(ColumnDef::new(Entries::PointGeom).text())
                    .col(ColumnDef::new(Entries::PolygonGeom).text())
                    .col(ColumnDef::new(Entries::MinLon).double())
                    .col(ColumnDef::new(Entries::MinLat).double())
                    .col(ColumnDef::new(Entries::MaxLon).double())
                    .col(ColumnDef::new(Entries::MaxLat).double())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_entries_depth")
                    .table(Entries::Table)
                    .col(Entries::Depth)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_entries_bbox")
                    .table(Entries::Table)
                    .col(Entries::MinLon)
                    .col(Entries::MinLat)
                    .col(Entries::MaxLon)
                    .col(Entries::MaxLat)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EntriesMeta::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(EntriesMeta::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(EntriesMeta::Path).string().not_null())
                    .col(ColumnDef::new(EntriesMeta::Key).string().not_null())
                    .col(ColumnDef::new(EntriesMeta::Data).text().not_null())
                    .col(ColumnDef::new(EntriesMeta::Mtime).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_entries_meta_path_key")
                    .table(EntriesMeta::Table)
                    .col(EntriesMeta::Path)
                    .col(EntriesMeta::Key)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Passwords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Passwords::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Passwords::Hash).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DatabaseMeta::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DatabaseMeta::Id).integer().not_null().primary_key())
                    .col(ColumnDef::new(DatabaseMeta::LastUpdate).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .exec_stmt(
                Query::insert()
                    .into_table(DatabaseMeta::Table)
                    .columns([DatabaseMeta::Id, DatabaseMeta::LastUpdate])
                    .values_panic([0.into(), 0i64.into()])
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DatabaseMeta::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Passwords::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EntriesMeta::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Entries::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Entries {
    Table,
    Path,
    Hash,
    EntryType,
    Properties,
    Mtime,
    Size,
    Depth,
    PointGeom,
    PolygonGeom,
    MinLon,
    MinLat,
    MaxLon,
    MaxLat,
}

#[derive(DeriveIden)]
enum EntriesMeta {
    Table,
    Id,
    Path,
    Key,
    Data,
    Mtime,
}

#[derive(DeriveIden)]
enum Passwords {
    Table,
    Id,
    Hash,
}

#[derive(DeriveIden)]
enum DatabaseMeta {
    Table,
    Id,
    LastUpdate,
}

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ========== STATIONS ==========
        manager
            .create_table(
                Table::create()
                    .table(Stations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Stations::Id)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Stations::Name).string_len(128).not_null())
                    .col(ColumnDef::new(Stations::Latitude).double())
                    .col(ColumnDef::new(Stations::Longitude).double())
                    .col(ColumnDef::new(Stations::Elevation).double())
                    .col(
                        ColumnDef::new(Stations::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Stations::LastUpdated).timestamp_with_time_zone())
                    .col(ColumnDef::new(Stations::Metadata).json())
                    .col(
                        ColumnDef::new(Stations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // ========== SENSORS ==========
        // Never deleted: a sensor that stops reporting still owns its history.
        manager
            .create_table(
                Table::create()
                    .table(Sensors::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Sensors::StationId).string_len(64).not_null())
                    .col(ColumnDef::new(Sensors::SensorKey).string_len(128).not_null())
                    .col(ColumnDef::new(Sensors::Name).string_len(128).not_null())
                    .col(
                        ColumnDef::new(Sensors::SensorType)
                            .string_len(64)
                            .not_null()
                            .default("unknown"),
                    )
                    .col(
                        ColumnDef::new(Sensors::Unit)
                            .string_len(32)
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Sensors::Position).string_len(128))
                    .col(ColumnDef::new(Sensors::Metadata).json())
                    .col(
                        ColumnDef::new(Sensors::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Sensors::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(Sensors::StationId)
                            .col(Sensors::SensorKey),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sensors_station")
                            .from(Sensors::Table, Sensors::StationId)
                            .to(Stations::Table, Stations::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // ========== MEASUREMENTS ==========
        // (station_id, sensor_key, timestamp) is the idempotency key and also
        // serves "time range per sensor" queries.
        manager
            .create_table(
                Table::create()
                    .table(Measurements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Measurements::StationId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Measurements::SensorKey)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Measurements::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Measurements::Value).double())
                    .primary_key(
                        Index::create()
                            .col(Measurements::StationId)
                            .col(Measurements::SensorKey)
                            .col(Measurements::Timestamp),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_measurements_sensor")
                            .from(
                                Measurements::Table,
                                (Measurements::StationId, Measurements::SensorKey),
                            )
                            .to(Sensors::Table, (Sensors::StationId, Sensors::SensorKey)),
                    )
                    .to_owned(),
            )
            .await?;

        // "Latest per station" lookups
        manager
            .create_index(
                Index::create()
                    .name("idx_measurements_station_time")
                    .table(Measurements::Table)
                    .col(Measurements::StationId)
                    .col(Measurements::Timestamp)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stations_enabled")
                    .table(Stations::Table)
                    .col(Stations::Enabled)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Measurements::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sensors::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Stations::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
pub enum Stations {
    Table,
    Id,
    Name,
    Latitude,
    Longitude,
    Elevation,
    Enabled,
    LastUpdated,
    Metadata,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum Sensors {
    Table,
    StationId,
    SensorKey,
    Name,
    #[sea_orm(iden = "type")]
    SensorType,
    Unit,
    Position,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum Measurements {
    Table,
    StationId,
    SensorKey,
    Timestamp,
    Value,
}

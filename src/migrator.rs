use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_catalog_tables::Migration),
            Box::new(m20240301_000002_create_customer_tables::Migration),
            Box::new(m20240301_000003_create_order_tables::Migration),
            Box::new(m20240301_000004_create_wallet_tables::Migration),
            Box::new(m20240301_000005_create_reviews::Migration),
        ]
    }
}

mod m20240301_000001_create_catalog_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_catalog_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Price).decimal_len(16, 4).not_null())
                        .col(
                            ColumnDef::new(Products::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Products::DeletedAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Products::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Products::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Offers::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Offers::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Offers::ProductId).uuid().not_null().unique_key())
                        .col(ColumnDef::new(Offers::Percentage).integer().not_null())
                        .col(ColumnDef::new(Offers::DeletedAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Offers::CreatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Coupons::Code).string().not_null().unique_key())
                        .col(ColumnDef::new(Coupons::DiscountType).string_len(20).not_null())
                        .col(ColumnDef::new(Coupons::DiscountValue).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Coupons::Description).string().null())
                        .col(
                            ColumnDef::new(Coupons::MinPurchaseAmount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::MaxPurchaseAmount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Coupons::StartsAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Coupons::EndsAt).timestamp_with_time_zone().null())
                        .col(
                            ColumnDef::new(Coupons::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Coupons::CreatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Offers::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Name,
        Price,
        Quantity,
        DeletedAt,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Offers {
        Table,
        Id,
        ProductId,
        Percentage,
        DeletedAt,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        Code,
        DiscountType,
        DiscountValue,
        Description,
        MinPurchaseAmount,
        MaxPurchaseAmount,
        StartsAt,
        EndsAt,
        IsActive,
        CreatedAt,
    }
}

mod m20240301_000002_create_customer_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_customer_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Addresses::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Addresses::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Addresses::UserId).uuid().not_null())
                        .col(ColumnDef::new(Addresses::Name).string().not_null())
                        .col(ColumnDef::new(Addresses::Line1).string().not_null())
                        .col(ColumnDef::new(Addresses::Line2).string().null())
                        .col(ColumnDef::new(Addresses::City).string().not_null())
                        .col(ColumnDef::new(Addresses::State).string().not_null())
                        .col(ColumnDef::new(Addresses::PostalCode).string().not_null())
                        .col(ColumnDef::new(Addresses::Country).string().not_null())
                        .col(ColumnDef::new(Addresses::Phone).string().not_null())
                        .col(ColumnDef::new(Addresses::DeletedAt).timestamp_with_time_zone().null())
                        .col(ColumnDef::new(Addresses::CreatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_addresses_user_id")
                        .table(Addresses::Table)
                        .col(Addresses::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartItems::UserId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(CartItems::LineTotal).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(CartItems::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(CartItems::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_user_product")
                        .table(CartItems::Table)
                        .col(CartItems::UserId)
                        .col(CartItems::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(WishlistItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(WishlistItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(WishlistItems::UserId).uuid().not_null())
                        .col(ColumnDef::new(WishlistItems::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(WishlistItems::CreatedAt)
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
                        .name("idx_wishlist_items_user_product")
                        .table(WishlistItems::Table)
                        .col(WishlistItems::UserId)
                        .col(WishlistItems::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WishlistItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Addresses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Addresses {
        Table,
        Id,
        UserId,
        Name,
        Line1,
        Line2,
        City,
        State,
        PostalCode,
        Country,
        Phone,
        DeletedAt,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        UserId,
        ProductId,
        Quantity,
        LineTotal,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum WishlistItems {
        Table,
        Id,
        UserId,
        ProductId,
        CreatedAt,
    }
}

mod m20240301_000003_create_order_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_order_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null().unique_key())
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::AddressId).uuid().not_null())
                        .col(ColumnDef::new(Orders::PaymentId).string().null())
                        .col(ColumnDef::new(Orders::CouponId).uuid().null())
                        .col(ColumnDef::new(Orders::Total).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Orders::Discount).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Orders::CouponDiscount).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Orders::Quantity).integer().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::PaymentStatus).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::Method).string_len(20).not_null())
                        .col(ColumnDef::new(Orders::ReturnReason).string().null())
                        .col(ColumnDef::new(Orders::OrderDate).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Orders::UpdatedAt).timestamp_with_time_zone().not_null())
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_id")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_payment_id")
                        .table(Orders::Table)
                        .col(Orders::PaymentId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(OrderItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::UnitPrice).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(OrderItems::Discount).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(OrderItems::Price).decimal_len(16, 4).not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PendingPayments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PendingPayments::Token)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PendingPayments::UserId).uuid().not_null())
                        .col(ColumnDef::new(PendingPayments::AddressId).uuid().not_null())
                        .col(ColumnDef::new(PendingPayments::CouponId).uuid().null())
                        .col(ColumnDef::new(PendingPayments::Total).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(PendingPayments::Discount).decimal_len(16, 4).not_null())
                        .col(
                            ColumnDef::new(PendingPayments::CouponDiscount)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PendingPayments::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(PendingPayments::SettlementAmount)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PendingPayments::SettlementCurrency)
                                .string_len(3)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PendingPayments::Status).string_len(20).not_null())
                        .col(
                            ColumnDef::new(PendingPayments::PaymentStatus)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PendingPayments::Items).json().not_null())
                        .col(ColumnDef::new(PendingPayments::OrderId).uuid().null())
                        .col(
                            ColumnDef::new(PendingPayments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PendingPayments::UpdatedAt)
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
                        .name("idx_pending_payments_status_created_at")
                        .table(PendingPayments::Table)
                        .col(PendingPayments::Status)
                        .col(PendingPayments::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PendingPayments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
        OrderNumber,
        UserId,
        AddressId,
        PaymentId,
        CouponId,
        Total,
        Discount,
        CouponDiscount,
        Quantity,
        Status,
        PaymentStatus,
        Method,
        ReturnReason,
        OrderDate,
        UpdatedAt,
        Version,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Quantity,
        UnitPrice,
        Discount,
        Price,
    }

    #[derive(DeriveIden)]
    enum PendingPayments {
        Table,
        Token,
        UserId,
        AddressId,
        CouponId,
        Total,
        Discount,
        CouponDiscount,
        Quantity,
        SettlementAmount,
        SettlementCurrency,
        Status,
        PaymentStatus,
        Items,
        OrderId,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000004_create_wallet_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_wallet_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Wallets::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Wallets::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Wallets::UserId).uuid().not_null().unique_key())
                        .col(
                            ColumnDef::new(Wallets::Balance)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Wallets::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Wallets::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(WalletTransactions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(WalletTransactions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(WalletTransactions::UserId).uuid().not_null())
                        .col(ColumnDef::new(WalletTransactions::OrderId).uuid().null())
                        .col(
                            ColumnDef::new(WalletTransactions::Amount)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(WalletTransactions::TransactionType)
                                .string_len(10)
                                .not_null(),
                        )
                        .col(ColumnDef::new(WalletTransactions::Description).string().not_null())
                        .col(
                            ColumnDef::new(WalletTransactions::CreatedAt)
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
                        .name("idx_wallet_transactions_user_id")
                        .table(WalletTransactions::Table)
                        .col(WalletTransactions::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(WalletTransactions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Wallets::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Wallets {
        Table,
        Id,
        UserId,
        Balance,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum WalletTransactions {
        Table,
        Id,
        UserId,
        OrderId,
        Amount,
        TransactionType,
        Description,
        CreatedAt,
    }
}

mod m20240301_000005_create_reviews {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_reviews"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Reviews::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Reviews::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Reviews::UserId).uuid().not_null())
                        .col(ColumnDef::new(Reviews::ProductId).uuid().not_null())
                        .col(ColumnDef::new(Reviews::Rating).integer().not_null())
                        .col(ColumnDef::new(Reviews::Comment).text().not_null())
                        .col(ColumnDef::new(Reviews::CreatedAt).timestamp_with_time_zone().not_null())
                        .col(ColumnDef::new(Reviews::UpdatedAt).timestamp_with_time_zone().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_reviews_user_product")
                        .table(Reviews::Table)
                        .col(Reviews::UserId)
                        .col(Reviews::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_reviews_product_id")
                        .table(Reviews::Table)
                        .col(Reviews::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Reviews::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Reviews {
        Table,
        Id,
        UserId,
        ProductId,
        Rating,
        Comment,
        CreatedAt,
        UpdatedAt,
    }
}

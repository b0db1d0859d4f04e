diesel::table! {
    stores (id) {
        id -> Uuid,
        slug -> Varchar,
        name -> Varchar,
        currency -> Varchar,
        language -> Varchar,
        published -> Bool,
        order_seq -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        store_id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        image_url -> Nullable<Varchar>,
        is_available -> Bool,
        stock -> Nullable<Int4>,
    }
}

diesel::table! {
    product_variants (id) {
        id -> Uuid,
        product_id -> Uuid,
        price -> Nullable<Numeric>,
        option_labels -> Jsonb,
        image_url -> Nullable<Varchar>,
        is_available -> Bool,
        stock -> Nullable<Int4>,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        store_id -> Uuid,
        order_number -> Int8,
        customer_name -> Varchar,
        customer_phone -> Varchar,
        customer_email -> Nullable<Varchar>,
        customer_city -> Nullable<Varchar>,
        customer_country -> Nullable<Varchar>,
        customer_address -> Varchar,
        note -> Nullable<Text>,
        subtotal -> Numeric,
        total -> Numeric,
        payment_method -> Varchar,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Uuid,
        variant_id -> Nullable<Uuid>,
        product_name -> Varchar,
        price -> Numeric,
        variant_options -> Jsonb,
        image_url -> Nullable<Varchar>,
        quantity -> Int4,
    }
}

diesel::table! {
    integration_installations (id) {
        id -> Uuid,
        store_id -> Uuid,
        integration_id -> Varchar,
        config -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    integration_events (id) {
        id -> Uuid,
        store_id -> Uuid,
        integration_id -> Varchar,
        event_type -> Varchar,
        payload -> Jsonb,
        status -> Varchar,
        error -> Nullable<Text>,
        created_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    abandoned_checkouts (id) {
        id -> Uuid,
        store_id -> Uuid,
        customer_name -> Nullable<Varchar>,
        customer_phone -> Varchar,
        customer_email -> Nullable<Varchar>,
        items -> Jsonb,
        currency -> Varchar,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        sent_at -> Nullable<Timestamptz>,
        recovered_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(products -> stores (store_id));
diesel::joinable!(product_variants -> products (product_id));
diesel::joinable!(orders -> stores (store_id));
diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(integration_installations -> stores (store_id));
diesel::joinable!(integration_events -> stores (store_id));
diesel::joinable!(abandoned_checkouts -> stores (store_id));

diesel::allow_tables_to_appear_in_same_query!(
    stores,
    products,
    product_variants,
    orders,
    order_items,
    integration_installations,
    integration_events,
    abandoned_checkouts,
);

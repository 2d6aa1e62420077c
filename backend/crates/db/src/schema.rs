use sqlx::PgPool;

use coach_common::error::{CoachError, CoachResult};

/// Idempotent DDL for the rubric, script and sync-log tables.
pub const SCHEMA: &str = r#"
create table if not exists rubric_configs (
    id uuid primary key,
    name text not null,
    description text,
    version integer unique,
    is_active boolean not null default false,
    is_draft boolean not null default true,
    created_at timestamptz not null default now(),
    updated_at timestamptz not null default now(),
    constraint rubric_configs_draft_never_active check (not (is_draft and is_active)),
    constraint rubric_configs_version_positive check (version is null or version > 0)
);

create unique index if not exists rubric_configs_single_active_uidx
    on rubric_configs (is_active) where is_active;

create table if not exists rubric_active_pointer (
    id boolean primary key default true,
    config_id uuid references rubric_configs (id),
    updated_at timestamptz not null default now(),
    constraint rubric_active_pointer_singleton check (id)
);

insert into rubric_active_pointer (id, config_id) values (true, null)
    on conflict (id) do nothing;

create table if not exists rubric_categories (
    id uuid primary key,
    config_id uuid not null references rubric_configs (id) on delete cascade,
    name text not null,
    slug text not null,
    description text,
    weight double precision not null,
    sort_order integer not null default 0,
    is_enabled boolean not null default true,
    created_at timestamptz not null default now(),
    updated_at timestamptz not null default now(),
    unique (config_id, slug)
);

create table if not exists rubric_scoring_criteria (
    id uuid primary key,
    category_id uuid not null references rubric_categories (id) on delete cascade,
    score integer not null,
    description text not null,
    unique (category_id, score)
);

create table if not exists rubric_red_flags (
    id uuid primary key,
    config_id uuid not null references rubric_configs (id) on delete cascade,
    flag_key text not null,
    display_name text not null,
    description text,
    severity text not null,
    threshold_type text not null default 'boolean',
    threshold_value double precision,
    is_enabled boolean not null default true,
    sort_order integer not null default 0,
    created_at timestamptz not null default now(),
    updated_at timestamptz not null default now(),
    unique (config_id, flag_key)
);

create table if not exists sales_scripts (
    id uuid primary key,
    product_type text not null,
    name text not null,
    version integer not null,
    content text not null,
    is_active boolean not null default false,
    created_at timestamptz not null default now(),
    updated_at timestamptz not null default now(),
    unique (product_type, version)
);

create unique index if not exists sales_scripts_active_per_product_uidx
    on sales_scripts (product_type) where is_active;

create table if not exists rubric_sync_logs (
    id uuid primary key,
    script_id uuid not null,
    rubric_config_id uuid,
    status text not null default 'pending',
    changes_proposed jsonb,
    changes_approved jsonb,
    changes_rejected jsonb,
    error_message text,
    approved_by text,
    approved_at timestamptz,
    rejected_by text,
    applied_at timestamptz,
    applied_config_id uuid,
    created_at timestamptz not null default now(),
    updated_at timestamptz not null default now()
);

create index if not exists rubric_sync_logs_script_idx
    on rubric_sync_logs (script_id, created_at desc);
"#;

/// Apply [`SCHEMA`]. Safe to run on every start.
pub async fn ensure_schema(pool: &PgPool) -> CoachResult<()> {
    tracing::info!("ensuring database schema");
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| CoachError::Database(e.to_string()))?;
    Ok(())
}

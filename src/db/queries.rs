//! Database queries for contracts, versions and proposals.
//!
//! Reads take the pool; writes take a connection so they can run inside the
//! version transaction. The product-claim scan takes a connection too, since
//! the version commit re-runs it under its advisory locks.

use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use std::collections::BTreeMap;

use super::rows::{
    AssignmentRow, ContractRow, HistoryRow, PriceRow, ProposalLineRow, ProposalRow, ReferenceRow,
    VersionRow,
};
use crate::error::Result;
use crate::models::{
    AssignmentKind, ContractAttributes, ContractId, EntityId, PriceTerms, ProductId, Proposal,
    ProposalId, ProposalProduct, ProposalStatus, StatusHistoryEntry, VersionNumber,
};

/// Current assignment table for a relationship kind
fn current_table(kind: AssignmentKind) -> &'static str {
    match kind {
        AssignmentKind::Distributor => "contract_distributor",
        AssignmentKind::Industry => "contract_industry",
        AssignmentKind::Manufacturer => "contract_manufacturer",
        AssignmentKind::OpCo => "contract_opco",
        AssignmentKind::Product => "contract_product",
    }
}

/// Append-only history table for a relationship kind
fn history_table(kind: AssignmentKind) -> &'static str {
    match kind {
        AssignmentKind::Distributor => "contract_distributor_version",
        AssignmentKind::Industry => "contract_industry_version",
        AssignmentKind::Manufacturer => "contract_manufacturer_version",
        AssignmentKind::OpCo => "contract_opco_version",
        AssignmentKind::Product => "contract_product_version",
    }
}

fn id_column(kind: AssignmentKind) -> &'static str {
    match kind {
        AssignmentKind::Distributor => "distributor_id",
        AssignmentKind::Industry => "industry_id",
        AssignmentKind::Manufacturer => "manufacturer_id",
        AssignmentKind::OpCo => "opco_id",
        AssignmentKind::Product => "product_id",
    }
}

// ==================== Contract reads ====================

pub async fn next_contract_id(pool: &PgPool) -> Result<ContractId> {
    let id = sqlx::query_scalar::<_, i64>("SELECT nextval('contract_id_seq')")
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn get_contract(pool: &PgPool, id: ContractId) -> Result<Option<ContractRow>> {
    let contract = sqlx::query_as::<_, ContractRow>(
        r#"
        SELECT
            id, name, foreign_id, start_date, end_date,
            is_suspended, suspended_date,
            reference_number, billback_name, terms, notes, contact_person,
            program_type_codes, current_version_number, proposal_id,
            created_at, updated_at
        FROM contract
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(contract)
}

/// Contracts not suspended whose term includes `as_of`
pub async fn get_active_contracts(pool: &PgPool, as_of: NaiveDate) -> Result<Vec<ContractRow>> {
    let contracts = sqlx::query_as::<_, ContractRow>(
        r#"
        SELECT
            id, name, foreign_id, start_date, end_date,
            is_suspended, suspended_date,
            reference_number, billback_name, terms, notes, contact_person,
            program_type_codes, current_version_number, proposal_id,
            created_at, updated_at
        FROM contract
        WHERE is_suspended = FALSE
          AND start_date <= $1
          AND (end_date IS NULL OR end_date >= $1)
        ORDER BY id
        "#,
    )
    .bind(as_of)
    .fetch_all(pool)
    .await?;

    Ok(contracts)
}

/// Contracts whose current version assigns the product
pub async fn get_contracts_claiming_product(
    conn: &mut PgConnection,
    product_id: ProductId,
    exclude_contract_id: Option<ContractId>,
    include_suspended: bool,
) -> Result<Vec<ContractRow>> {
    let contracts = sqlx::query_as::<_, ContractRow>(
        r#"
        SELECT
            c.id, c.name, c.foreign_id, c.start_date, c.end_date,
            c.is_suspended, c.suspended_date,
            c.reference_number, c.billback_name, c.terms, c.notes, c.contact_person,
            c.program_type_codes, c.current_version_number, c.proposal_id,
            c.created_at, c.updated_at
        FROM contract c
        JOIN contract_product cp ON cp.contract_id = c.id
        WHERE cp.product_id = $1
          AND ($2::BIGINT IS NULL OR c.id <> $2)
          AND ($3 OR c.is_suspended = FALSE)
        ORDER BY c.id
        "#,
    )
    .bind(product_id)
    .bind(exclude_contract_id)
    .bind(include_suspended)
    .fetch_all(&mut *conn)
    .await?;

    Ok(contracts)
}

/// Live relationships of one kind for a set of contracts
pub async fn get_current_assignments(
    conn: &mut PgConnection,
    kind: AssignmentKind,
    contract_ids: &[ContractId],
) -> Result<Vec<AssignmentRow>> {
    let sql = format!(
        "SELECT contract_id, {column} AS related_id FROM {table} WHERE contract_id = ANY($1) ORDER BY contract_id, {column}",
        column = id_column(kind),
        table = current_table(kind),
    );
    let rows = sqlx::query_as::<_, AssignmentRow>(&sql)
        .bind(contract_ids)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows)
}

// ==================== Version reads ====================

pub async fn get_version(
    pool: &PgPool,
    contract_id: ContractId,
    version: VersionNumber,
) -> Result<Option<VersionRow>> {
    let row = sqlx::query_as::<_, VersionRow>(
        r#"
        SELECT
            contract_id, version_number,
            name, foreign_id, start_date, end_date,
            is_suspended, suspended_date,
            reference_number, billback_name, terms, notes, contact_person,
            program_type_codes, created_at
        FROM contract_version
        WHERE contract_id = $1 AND version_number = $2
        "#,
    )
    .bind(contract_id)
    .bind(version)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

pub async fn list_versions(pool: &PgPool, contract_id: ContractId) -> Result<Vec<VersionRow>> {
    let rows = sqlx::query_as::<_, VersionRow>(
        r#"
        SELECT
            contract_id, version_number,
            name, foreign_id, start_date, end_date,
            is_suspended, suspended_date,
            reference_number, billback_name, terms, notes, contact_person,
            program_type_codes, created_at
        FROM contract_version
        WHERE contract_id = $1
        ORDER BY version_number
        "#,
    )
    .bind(contract_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Related ids recorded in history at exactly `version`
pub async fn get_version_assignments(
    pool: &PgPool,
    kind: AssignmentKind,
    contract_id: ContractId,
    version: VersionNumber,
) -> Result<Vec<EntityId>> {
    let sql = format!(
        "SELECT {column} FROM {table} WHERE contract_id = $1 AND version_number = $2 ORDER BY {column}",
        column = id_column(kind),
        table = history_table(kind),
    );
    let ids = sqlx::query_scalar::<_, i64>(&sql)
        .bind(contract_id)
        .bind(version)
        .fetch_all(pool)
        .await?;

    Ok(ids)
}

pub async fn get_version_prices(
    pool: &PgPool,
    contract_id: ContractId,
    version: VersionNumber,
) -> Result<Vec<PriceRow>> {
    let rows = sqlx::query_as::<_, PriceRow>(
        r#"
        SELECT
            product_id, price_type,
            allowance, commercial_fob, commercial_del, commodity_fob, commodity_del,
            pua, ffs, noi, ptv,
            uom, estimated_quantity, billback_allowed
        FROM contract_price_version
        WHERE contract_id = $1 AND version_number = $2
        ORDER BY product_id
        "#,
    )
    .bind(contract_id)
    .bind(version)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ==================== Contract writes ====================

/// Insert a brand-new contract row; returns false if the id is taken
pub async fn insert_contract(
    conn: &mut PgConnection,
    id: ContractId,
    attributes: &ContractAttributes,
    version: VersionNumber,
    proposal_id: Option<ProposalId>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO contract (
            id, name, foreign_id, start_date, end_date,
            is_suspended, suspended_date,
            reference_number, billback_name, terms, notes, contact_person,
            program_type_codes, current_version_number, proposal_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(&attributes.name)
    .bind(&attributes.foreign_id)
    .bind(attributes.start_date)
    .bind(attributes.end_date)
    .bind(attributes.is_suspended)
    .bind(attributes.suspended_date)
    .bind(&attributes.reference_number)
    .bind(&attributes.billback_name)
    .bind(&attributes.terms)
    .bind(&attributes.notes)
    .bind(&attributes.contact_person)
    .bind(&attributes.program_type_codes)
    .bind(version)
    .bind(proposal_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Compare-and-swap the current version pointer and refresh the mirrored
/// attributes. Suspension columns are left alone and returned so the new
/// version row can carry them; `None` if `expected` is no longer current.
pub async fn advance_contract(
    conn: &mut PgConnection,
    id: ContractId,
    attributes: &ContractAttributes,
    expected: VersionNumber,
    next: VersionNumber,
) -> Result<Option<(bool, Option<NaiveDate>)>> {
    let suspension = sqlx::query_as::<_, (bool, Option<NaiveDate>)>(
        r#"
        UPDATE contract
        SET name = $4, foreign_id = $5, start_date = $6, end_date = $7,
            reference_number = $8, billback_name = $9, terms = $10,
            notes = $11, contact_person = $12, program_type_codes = $13,
            current_version_number = $3,
            updated_at = NOW()
        WHERE id = $1 AND current_version_number = $2
        RETURNING is_suspended, suspended_date
        "#,
    )
    .bind(id)
    .bind(expected)
    .bind(next)
    .bind(&attributes.name)
    .bind(&attributes.foreign_id)
    .bind(attributes.start_date)
    .bind(attributes.end_date)
    .bind(&attributes.reference_number)
    .bind(&attributes.billback_name)
    .bind(&attributes.terms)
    .bind(&attributes.notes)
    .bind(&attributes.contact_person)
    .bind(&attributes.program_type_codes)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(suspension)
}

/// Serialise claim checks on one product until the transaction ends
pub async fn lock_product_claims(conn: &mut PgConnection, product_id: ProductId) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(product_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn insert_version(
    conn: &mut PgConnection,
    contract_id: ContractId,
    version: VersionNumber,
    attributes: &ContractAttributes,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO contract_version (
            contract_id, version_number,
            name, foreign_id, start_date, end_date,
            is_suspended, suspended_date,
            reference_number, billback_name, terms, notes, contact_person,
            program_type_codes
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(contract_id)
    .bind(version)
    .bind(&attributes.name)
    .bind(&attributes.foreign_id)
    .bind(attributes.start_date)
    .bind(attributes.end_date)
    .bind(attributes.is_suspended)
    .bind(attributes.suspended_date)
    .bind(&attributes.reference_number)
    .bind(&attributes.billback_name)
    .bind(&attributes.terms)
    .bind(&attributes.notes)
    .bind(&attributes.contact_person)
    .bind(&attributes.program_type_codes)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Replace the live rows of one kind and append them to history at `version`
pub async fn write_assignments(
    conn: &mut PgConnection,
    kind: AssignmentKind,
    contract_id: ContractId,
    ids: &[EntityId],
    version: VersionNumber,
) -> Result<()> {
    let column = id_column(kind);

    let delete = format!("DELETE FROM {} WHERE contract_id = $1", current_table(kind));
    sqlx::query(&delete)
        .bind(contract_id)
        .execute(&mut *conn)
        .await?;

    if ids.is_empty() {
        return Ok(());
    }

    let insert_current = format!(
        "INSERT INTO {} (contract_id, {}, current_version_number) SELECT $1, UNNEST($2::BIGINT[]), $3",
        current_table(kind),
        column,
    );
    sqlx::query(&insert_current)
        .bind(contract_id)
        .bind(ids)
        .bind(version)
        .execute(&mut *conn)
        .await?;

    let insert_history = format!(
        "INSERT INTO {} (contract_id, {}, version_number) SELECT $1, UNNEST($2::BIGINT[]), $3",
        history_table(kind),
        column,
    );
    sqlx::query(&insert_history)
        .bind(contract_id)
        .bind(ids)
        .bind(version)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Replace the live prices and append them to history at `version`
pub async fn write_prices(
    conn: &mut PgConnection,
    contract_id: ContractId,
    prices: &BTreeMap<ProductId, PriceTerms>,
    version: VersionNumber,
) -> Result<()> {
    sqlx::query("DELETE FROM contract_price WHERE contract_id = $1")
        .bind(contract_id)
        .execute(&mut *conn)
        .await?;

    for (product_id, price) in prices {
        for (table, version_column) in [
            ("contract_price", "current_version_number"),
            ("contract_price_version", "version_number"),
        ] {
            let sql = format!(
                r#"
                INSERT INTO {table} (
                    contract_id, product_id, {version_column}, price_type,
                    allowance, commercial_fob, commercial_del, commodity_fob, commodity_del,
                    pua, ffs, noi, ptv,
                    uom, estimated_quantity, billback_allowed
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#
            );
            sqlx::query(&sql)
                .bind(contract_id)
                .bind(product_id)
                .bind(version)
                .bind(&price.price_type)
                .bind(price.allowance)
                .bind(price.commercial_fob)
                .bind(price.commercial_del)
                .bind(price.commodity_fob)
                .bind(price.commodity_del)
                .bind(price.pua)
                .bind(price.ffs)
                .bind(price.noi)
                .bind(price.ptv)
                .bind(&price.uom)
                .bind(price.estimated_quantity)
                .bind(price.billback_allowed)
                .execute(&mut *conn)
                .await?;
        }
    }

    Ok(())
}

/// Set the suspension flag on the contract and its current version row
pub async fn update_suspension(
    conn: &mut PgConnection,
    id: ContractId,
    is_suspended: bool,
    suspended_date: Option<NaiveDate>,
) -> Result<Option<ContractRow>> {
    let contract = sqlx::query_as::<_, ContractRow>(
        r#"
        UPDATE contract
        SET is_suspended = $2, suspended_date = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING
            id, name, foreign_id, start_date, end_date,
            is_suspended, suspended_date,
            reference_number, billback_name, terms, notes, contact_person,
            program_type_codes, current_version_number, proposal_id,
            created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(is_suspended)
    .bind(suspended_date)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(contract) = contract else {
        return Ok(None);
    };

    sqlx::query(
        r#"
        UPDATE contract_version
        SET is_suspended = $3, suspended_date = $4
        WHERE contract_id = $1 AND version_number = $2
        "#,
    )
    .bind(id)
    .bind(contract.current_version_number)
    .bind(is_suspended)
    .bind(suspended_date)
    .execute(&mut *conn)
    .await?;

    Ok(Some(contract))
}

// ==================== Reference data ====================

pub async fn get_reference_rows(
    pool: &PgPool,
    kind: AssignmentKind,
    ids: &[EntityId],
) -> Result<Vec<ReferenceRow>> {
    let code = match kind {
        AssignmentKind::Product => "manufacturer_product_code",
        _ => "NULL::TEXT",
    };
    let sql = format!(
        "SELECT id, name, {code} AS code, is_active FROM {table} WHERE id = ANY($1) ORDER BY id",
        table = kind.as_str(),
    );
    let rows = sqlx::query_as::<_, ReferenceRow>(&sql)
        .bind(ids)
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

// ==================== Proposals ====================

pub async fn get_proposal(pool: &PgPool, id: ProposalId) -> Result<Option<ProposalRow>> {
    let proposal = sqlx::query_as::<_, ProposalRow>(
        r#"
        SELECT
            id, proposal_type, status, reject_reason,
            manufacturer_id, distributor_ids, industry_ids, opco_scope,
            start_date, end_date, due_date, amended_contract_id, terms,
            contract_id, contract_version_number,
            created_at, updated_at
        FROM proposal
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(proposal)
}

pub async fn get_proposal_lines(pool: &PgPool, id: ProposalId) -> Result<Vec<ProposalLineRow>> {
    let lines = sqlx::query_as::<_, ProposalLineRow>(
        r#"
        SELECT
            line_id, product_id, price_type,
            allowance, commercial_fob, commercial_del, commodity_fob, commodity_del,
            pua, ffs, noi, ptv,
            uom, estimated_quantity, billback_allowed,
            quantity, amendment_action, status
        FROM proposal_product
        WHERE proposal_id = $1
        ORDER BY line_id
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(lines)
}

/// Insert the header and return the generated id
pub async fn insert_proposal(conn: &mut PgConnection, proposal: &Proposal) -> Result<ProposalId> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO proposal (
            proposal_type, status, reject_reason,
            manufacturer_id, distributor_ids, industry_ids, opco_scope,
            start_date, end_date, due_date, amended_contract_id, terms,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
        RETURNING id
        "#,
    )
    .bind(proposal.proposal_type.as_str())
    .bind(proposal.status.as_str())
    .bind(&proposal.reject_reason)
    .bind(proposal.manufacturer_id)
    .bind(proposal.distributor_ids.as_ref().map(|ids| ids.iter().copied().collect::<Vec<_>>()))
    .bind(proposal.industry_ids.as_ref().map(|ids| ids.iter().copied().collect::<Vec<_>>()))
    .bind(sqlx::types::Json(&proposal.opco_scope))
    .bind(proposal.start_date)
    .bind(proposal.end_date)
    .bind(proposal.due_date)
    .bind(proposal.amended_contract_id)
    .bind(proposal.terms.as_ref().map(sqlx::types::Json))
    .bind(proposal.created_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Rewrite the header if the stored status still equals `expected`.
/// Returns false when the status moved underneath the caller.
pub async fn update_proposal_if_status(
    conn: &mut PgConnection,
    proposal: &Proposal,
    expected: ProposalStatus,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE proposal
        SET status = $3, reject_reason = $4,
            distributor_ids = $5, industry_ids = $6, opco_scope = $7,
            start_date = $8, end_date = $9, due_date = $10, terms = $11,
            contract_id = $12, contract_version_number = $13,
            updated_at = NOW()
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(proposal.id)
    .bind(expected.as_str())
    .bind(proposal.status.as_str())
    .bind(&proposal.reject_reason)
    .bind(proposal.distributor_ids.as_ref().map(|ids| ids.iter().copied().collect::<Vec<_>>()))
    .bind(proposal.industry_ids.as_ref().map(|ids| ids.iter().copied().collect::<Vec<_>>()))
    .bind(sqlx::types::Json(&proposal.opco_scope))
    .bind(proposal.start_date)
    .bind(proposal.end_date)
    .bind(proposal.due_date)
    .bind(proposal.terms.as_ref().map(sqlx::types::Json))
    .bind(proposal.contract_id)
    .bind(proposal.contract_version_number)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Stored status text, read inside the caller's transaction
pub async fn get_proposal_status(
    conn: &mut PgConnection,
    id: ProposalId,
) -> Result<Option<String>> {
    let status = sqlx::query_scalar::<_, String>("SELECT status FROM proposal WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(status)
}

pub async fn replace_proposal_lines(
    conn: &mut PgConnection,
    proposal_id: ProposalId,
    lines: &[ProposalProduct],
) -> Result<()> {
    sqlx::query("DELETE FROM proposal_product WHERE proposal_id = $1")
        .bind(proposal_id)
        .execute(&mut *conn)
        .await?;

    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO proposal_product (
                proposal_id, line_id, product_id, price_type,
                allowance, commercial_fob, commercial_del, commodity_fob, commodity_del,
                pua, ffs, noi, ptv,
                uom, estimated_quantity, billback_allowed,
                quantity, amendment_action, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(proposal_id)
        .bind(line.line_id)
        .bind(line.product_id)
        .bind(&line.price.price_type)
        .bind(line.price.allowance)
        .bind(line.price.commercial_fob)
        .bind(line.price.commercial_del)
        .bind(line.price.commodity_fob)
        .bind(line.price.commodity_del)
        .bind(line.price.pua)
        .bind(line.price.ffs)
        .bind(line.price.noi)
        .bind(line.price.ptv)
        .bind(&line.price.uom)
        .bind(line.price.estimated_quantity)
        .bind(line.price.billback_allowed)
        .bind(line.quantity)
        .bind(line.amendment_action.map(|a| a.as_str()))
        .bind(line.status.as_str())
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub async fn insert_status_history(
    conn: &mut PgConnection,
    entry: &StatusHistoryEntry,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO proposal_status_history (
            proposal_id, from_status, to_status, actor, comment, changed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.proposal_id)
    .bind(entry.from_status.map(|s| s.as_str()))
    .bind(entry.to_status.as_str())
    .bind(&entry.actor)
    .bind(&entry.comment)
    .bind(entry.changed_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn get_status_history(pool: &PgPool, id: ProposalId) -> Result<Vec<HistoryRow>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        r#"
        SELECT proposal_id, from_status, to_status, actor, comment, changed_at
        FROM proposal_status_history
        WHERE proposal_id = $1
        ORDER BY id
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

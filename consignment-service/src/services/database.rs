//! Database service for consignment-service.
//!
//! Every operation that touches more than one of {consignments, challans,
//! lr_details, history} runs inside a single Postgres transaction; a failed
//! guard rolls the whole unit back. Status transitions are enforced with
//! guarded UPDATE .. WHERE status = <expected> statements so a concurrent
//! writer cannot slip a consignment past a guard between read and write.

use crate::models::{
    Challan, ChallanTotals, ChallanType, Consignment, ConsignmentStatus, CreateConsignment,
    DeliveryAllocation, DeliveryCharges, HistoryAction, HistoryEntry, LineItem, LrDetail,
    StockItem, VehicleInfo, full_delivery_allocations, merge_stock, reconcile_delivery,
};
use crate::services::metrics::{CHALLAN_OPERATIONS, DB_QUERY_DURATION, STATUS_TRANSITIONS};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const CONSIGNMENT_COLUMNS: &str = "consignment_id, company_id, lr_no, status, origin_station, \
     destination_station, sender_name, receiver_name, freight_type, payment_mode, total_amount, \
     source, dispatch_status, delivery_memo_no, received_by, delivered_date, unloading_charge, \
     other_charge, delivery_remarks, booked_utc, updated_utc";

const CHALLAN_COLUMNS: &str = "challan_id, company_id, challan_no, challan_type, status, \
     vehicle_no, driver_name, driver_phone, freight_terms, from_station, to_station, total_lr, \
     total_packages, total_actual_weight, total_charge_weight, total_amount, created_utc, \
     finalized_utc";

const LR_DETAIL_COLUMNS: &str = "lr_detail_id, challan_id, company_id, lr_no, consignment_id, \
     from_station, to_station, description, quantity, actual_weight, charge_weight, amount";

/// Draft fields for saving an inward challan. `challan_id` present means
/// edit-in-place of an existing inward challan.
#[derive(Debug, Clone)]
pub struct InwardChallanDraft {
    pub challan_id: Option<Uuid>,
    pub from_station: String,
    pub to_station: String,
    pub vehicle_no: Option<String>,
    pub driver_name: Option<String>,
    /// Manifest rows for LRs booked at another hub, with no local record.
    pub externals: Vec<ExternalLr>,
}

/// One externally booked manifest row. Snapshotted on the challan with a
/// NULL consignment reference; it surfaces in the stock view as a
/// synthesized row until a receiving-side booking consumes it.
#[derive(Debug, Clone)]
pub struct ExternalLr {
    pub lr_no: String,
    pub description: String,
    pub quantity: i32,
    pub actual_weight: Decimal,
    pub charge_weight: Decimal,
    pub amount: Decimal,
}

/// Caller-supplied metadata for a delivery confirmation.
#[derive(Debug, Clone)]
pub struct DeliveryMeta {
    pub received_by: Option<String>,
    pub delivered_date: Option<NaiveDate>,
    pub remarks: Option<String>,
}

/// Per-consignment roll-up of line items used for LR-detail snapshots.
struct LineSummary {
    description: String,
    quantity: i32,
    actual_weight: Decimal,
    charge_weight: Decimal,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "consignment-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Sequences
    // -------------------------------------------------------------------------

    /// Allocate the next number in a per-(company, scope) sequence inside
    /// the caller's transaction. The upserted row is locked until commit,
    /// which serializes allocation per scope and makes duplicate numbers
    /// impossible under concurrent callers.
    async fn next_sequence(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        scope: &str,
    ) -> Result<i64, AppError> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequences (company_id, scope, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (company_id, scope)
            DO UPDATE SET last_value = sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(company_id)
        .bind(scope)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to allocate {} number: {}", scope, e))
        })?;
        Ok(value)
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// Append one audit entry within the caller's transaction. There is no
    /// update or delete counterpart.
    async fn append_history(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        lr_no: &str,
        action: HistoryAction,
        actor: &str,
        details: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO history (history_id, company_id, lr_no, action, actor, details)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(lr_no)
        .bind(action.as_str())
        .bind(actor)
        .bind(details)
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to append history: {}", e)))?;

        STATUS_TRANSITIONS.with_label_values(&[action.as_str()]).inc();
        Ok(())
    }

    /// Full audit trail for an LR, ascending. The canonical record of the
    /// consignment's life, independent of its mutable fields.
    #[instrument(skip(self), fields(company_id = %company_id, lr_no = %lr_no))]
    pub async fn get_history(
        &self,
        company_id: Uuid,
        lr_no: &str,
    ) -> Result<Vec<HistoryEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_history"])
            .start_timer();

        let entries = sqlx::query_as::<_, HistoryEntry>(
            r#"
            SELECT history_id, company_id, lr_no, action, actor, details, recorded_utc
            FROM history
            WHERE company_id = $1 AND lr_no = $2
            ORDER BY seq
            "#,
        )
        .bind(company_id)
        .bind(lr_no)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get history: {}", e)))?;

        timer.observe_duration();

        Ok(entries)
    }

    // -------------------------------------------------------------------------
    // Booking
    // -------------------------------------------------------------------------

    /// Book a consignment: insert the record, its line items, and the
    /// `booked` history entry atomically. Allocates the LR number from the
    /// per-company sequence when the caller did not supply one.
    #[instrument(skip(self, input), fields(company_id = %input.company_id))]
    pub async fn create_consignment(
        &self,
        input: &CreateConsignment,
        actor: &str,
    ) -> Result<(Consignment, Vec<LineItem>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_consignment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let lr_no = match &input.lr_no {
            Some(lr_no) => lr_no.clone(),
            None => {
                let n = Self::next_sequence(&mut tx, input.company_id, "lr").await?;
                format!("LR-{:06}", n)
            }
        };

        let consignment_id = Uuid::new_v4();
        let consignment = sqlx::query_as::<_, Consignment>(&format!(
            r#"
            INSERT INTO consignments (consignment_id, company_id, lr_no, status, origin_station,
                destination_station, sender_name, receiver_name, freight_type, payment_mode,
                total_amount, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {CONSIGNMENT_COLUMNS}
            "#
        ))
        .bind(consignment_id)
        .bind(input.company_id)
        .bind(&lr_no)
        .bind(ConsignmentStatus::InStock.as_str())
        .bind(&input.origin_station)
        .bind(&input.destination_station)
        .bind(&input.sender_name)
        .bind(&input.receiver_name)
        .bind(input.freight_type.as_str())
        .bind(&input.payment_mode)
        .bind(input.total_amount())
        .bind(input.source.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "LR number '{}' already exists for this company",
                    lr_no
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create consignment: {}", e)),
        })?;

        let mut line_items = Vec::with_capacity(input.line_items.len());
        for (i, item) in input.line_items.iter().enumerate() {
            let inserted = sqlx::query_as::<_, LineItem>(
                r#"
                INSERT INTO line_items (line_item_id, consignment_id, line_no, description,
                    quantity, actual_weight, charge_weight)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING line_item_id, consignment_id, line_no, description, quantity,
                    actual_weight, charge_weight, delivered_qty, return_qty
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(consignment_id)
            .bind((i + 1) as i32)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.actual_weight)
            .bind(item.charge_weight)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert line item: {}", e))
            })?;
            line_items.push(inserted);
        }

        Self::append_history(
            &mut tx,
            input.company_id,
            &lr_no,
            HistoryAction::Booked,
            actor,
            &format!(
                "Booked {} -> {}, {} line item(s)",
                input.origin_station,
                input.destination_station,
                line_items.len()
            ),
        )
        .await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            consignment_id = %consignment.consignment_id,
            lr_no = %consignment.lr_no,
            "Consignment booked"
        );

        Ok((consignment, line_items))
    }

    /// Get a consignment with its line items.
    #[instrument(skip(self), fields(company_id = %company_id, consignment_id = %consignment_id))]
    pub async fn get_consignment(
        &self,
        company_id: Uuid,
        consignment_id: Uuid,
    ) -> Result<Option<(Consignment, Vec<LineItem>)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_consignment"])
            .start_timer();

        let consignment = sqlx::query_as::<_, Consignment>(&format!(
            "SELECT {CONSIGNMENT_COLUMNS} FROM consignments \
             WHERE company_id = $1 AND consignment_id = $2"
        ))
        .bind(company_id)
        .bind(consignment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get consignment: {}", e)))?;

        let consignment = match consignment {
            Some(c) => c,
            None => return Ok(None),
        };

        let line_items = self.get_line_items(consignment_id).await?;

        timer.observe_duration();

        Ok(Some((consignment, line_items)))
    }

    /// Get a consignment by its LR number.
    #[instrument(skip(self), fields(company_id = %company_id, lr_no = %lr_no))]
    pub async fn get_consignment_by_lr(
        &self,
        company_id: Uuid,
        lr_no: &str,
    ) -> Result<Option<Consignment>, AppError> {
        let consignment = sqlx::query_as::<_, Consignment>(&format!(
            "SELECT {CONSIGNMENT_COLUMNS} FROM consignments \
             WHERE company_id = $1 AND lr_no = $2"
        ))
        .bind(company_id)
        .bind(lr_no)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get consignment: {}", e)))?;

        Ok(consignment)
    }

    async fn get_line_items(&self, consignment_id: Uuid) -> Result<Vec<LineItem>, AppError> {
        let line_items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT line_item_id, consignment_id, line_no, description, quantity,
                actual_weight, charge_weight, delivered_qty, return_qty
            FROM line_items
            WHERE consignment_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(consignment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))?;
        Ok(line_items)
    }

    /// Roll up line items per consignment for LR-detail snapshots, within
    /// the caller's transaction.
    async fn line_summaries(
        tx: &mut Transaction<'_, Postgres>,
        consignment_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, LineSummary>, AppError> {
        let rows: Vec<LineItem> = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT line_item_id, consignment_id, line_no, description, quantity,
                actual_weight, charge_weight, delivered_qty, return_qty
            FROM line_items
            WHERE consignment_id = ANY($1)
            ORDER BY consignment_id, line_no
            "#,
        )
        .bind(consignment_ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))?;

        let mut summaries: HashMap<Uuid, LineSummary> = HashMap::new();
        for item in rows {
            let entry = summaries
                .entry(item.consignment_id)
                .or_insert_with(|| LineSummary {
                    description: item.description.clone(),
                    quantity: 0,
                    actual_weight: Decimal::ZERO,
                    charge_weight: Decimal::ZERO,
                });
            entry.quantity += item.quantity;
            entry.actual_weight += item.actual_weight;
            entry.charge_weight += item.charge_weight;
        }
        Ok(summaries)
    }

    // -------------------------------------------------------------------------
    // Dispatch challan
    // -------------------------------------------------------------------------

    /// Create a pending loading (dispatch) challan from in-stock
    /// consignments. All-or-nothing: if any selected consignment is missing
    /// or not `in_stock` the whole operation fails and nothing changes.
    #[instrument(skip(self, selected_ids), fields(company_id = %company_id, selected = selected_ids.len()))]
    pub async fn create_loading_challan(
        &self,
        company_id: Uuid,
        from_station: &str,
        to_station: &str,
        selected_ids: &[Uuid],
        actor: &str,
    ) -> Result<(Challan, Vec<LrDetail>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_loading_challan"])
            .start_timer();

        if selected_ids.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A loading challan needs at least one consignment"
            )));
        }
        {
            let mut seen = std::collections::HashSet::new();
            for id in selected_ids {
                if !seen.insert(id) {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Consignment {} is selected twice",
                        id
                    )));
                }
            }
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Lock the selected rows so the guard below cannot be raced.
        let ids: Vec<Uuid> = selected_ids.to_vec();
        let consignments = sqlx::query_as::<_, Consignment>(&format!(
            "SELECT {CONSIGNMENT_COLUMNS} FROM consignments \
             WHERE company_id = $1 AND consignment_id = ANY($2) FOR UPDATE"
        ))
        .bind(company_id)
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to fetch consignments: {}", e))
        })?;

        if consignments.len() != ids.len() {
            let found: std::collections::HashSet<Uuid> =
                consignments.iter().map(|c| c.consignment_id).collect();
            let missing = ids.iter().find(|id| !found.contains(id));
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Consignment {} does not exist",
                missing.map(|id| id.to_string()).unwrap_or_default()
            )));
        }

        for c in &consignments {
            let status = c.parsed_status();
            if !status.is_some_and(|s| s.can_enter_loading()) {
                CHALLAN_OPERATIONS
                    .with_label_values(&["create_loading", "rejected"])
                    .inc();
                return Err(AppError::StatusGuard(anyhow::anyhow!(
                    "Consignment {} is '{}', only in-stock consignments can be loaded",
                    c.lr_no,
                    c.status
                )));
            }
        }

        let number = Self::next_sequence(&mut tx, company_id, "dispatch_challan").await?;
        let challan_no = format!("DC-{:06}", number);
        let challan_id = Uuid::new_v4();

        let summaries = Self::line_summaries(&mut tx, &ids).await?;

        let mut details = Vec::with_capacity(consignments.len());
        for c in &consignments {
            let summary = summaries.get(&c.consignment_id);
            details.push(LrDetail {
                lr_detail_id: Uuid::new_v4(),
                challan_id,
                company_id,
                lr_no: c.lr_no.clone(),
                consignment_id: Some(c.consignment_id),
                from_station: c.origin_station.clone(),
                to_station: c.destination_station.clone(),
                description: summary.map(|s| s.description.clone()).unwrap_or_default(),
                quantity: summary.map(|s| s.quantity).unwrap_or(0),
                actual_weight: summary.map(|s| s.actual_weight).unwrap_or(Decimal::ZERO),
                charge_weight: summary.map(|s| s.charge_weight).unwrap_or(Decimal::ZERO),
                amount: c.total_amount,
            });
        }

        let totals = ChallanTotals::from_details(&details);

        let challan = sqlx::query_as::<_, Challan>(&format!(
            r#"
            INSERT INTO challans (challan_id, company_id, challan_no, challan_type, status,
                from_station, to_station, total_lr, total_packages, total_actual_weight,
                total_charge_weight, total_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {CHALLAN_COLUMNS}
            "#
        ))
        .bind(challan_id)
        .bind(company_id)
        .bind(&challan_no)
        .bind(ChallanType::Dispatch.as_str())
        .bind("pending")
        .bind(from_station)
        .bind(to_station)
        .bind(totals.total_lr)
        .bind(totals.total_packages)
        .bind(totals.total_actual_weight)
        .bind(totals.total_charge_weight)
        .bind(totals.total_amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create challan: {}", e)))?;

        Self::insert_lr_details(&mut tx, &details).await?;

        for c in &consignments {
            Self::transition_status(
                &mut tx,
                company_id,
                c.consignment_id,
                ConsignmentStatus::InStock,
                ConsignmentStatus::InLoading,
            )
            .await?;
            Self::append_history(
                &mut tx,
                company_id,
                &c.lr_no,
                HistoryAction::Loaded,
                actor,
                &format!("Selected into loading challan {}", challan_no),
            )
            .await?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        CHALLAN_OPERATIONS
            .with_label_values(&["create_loading", "ok"])
            .inc();

        info!(
            challan_id = %challan.challan_id,
            challan_no = %challan.challan_no,
            total_lr = challan.total_lr,
            "Loading challan created"
        );

        Ok((challan, details))
    }

    /// Finalize a pending dispatch challan: merge in vehicle/driver/freight
    /// fields, flip it to `finalized` exactly once, and move every
    /// referenced consignment to `in_transit`. Re-finalizing fails with a
    /// conflict and leaves all statuses untouched.
    #[instrument(skip(self, vehicle), fields(company_id = %company_id, challan_id = %challan_id))]
    pub async fn finalize_challan(
        &self,
        company_id: Uuid,
        challan_id: Uuid,
        vehicle: &VehicleInfo,
        actor: &str,
    ) -> Result<Challan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["finalize_challan"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let existing = sqlx::query_as::<_, Challan>(&format!(
            "SELECT {CHALLAN_COLUMNS} FROM challans \
             WHERE company_id = $1 AND challan_id = $2 FOR UPDATE"
        ))
        .bind(company_id)
        .bind(challan_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch challan: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Challan {} not found", challan_id)))?;

        if existing.parsed_type() != Some(ChallanType::Dispatch) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Challan {} is not a dispatch challan",
                existing.challan_no
            )));
        }
        if existing.parsed_status() != Some(crate::models::ChallanStatus::Pending) {
            CHALLAN_OPERATIONS
                .with_label_values(&["finalize", "rejected"])
                .inc();
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Challan {} is already finalized",
                existing.challan_no
            )));
        }

        let details = Self::challan_details(&mut tx, company_id, challan_id).await?;
        if details.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Challan {} has no consignments",
                existing.challan_no
            )));
        }

        let challan = sqlx::query_as::<_, Challan>(&format!(
            r#"
            UPDATE challans
            SET vehicle_no = $3,
                driver_name = $4,
                driver_phone = $5,
                freight_terms = $6,
                status = 'finalized',
                finalized_utc = NOW()
            WHERE company_id = $1 AND challan_id = $2 AND status = 'pending'
            RETURNING {CHALLAN_COLUMNS}
            "#
        ))
        .bind(company_id)
        .bind(challan_id)
        .bind(&vehicle.vehicle_no)
        .bind(&vehicle.driver_name)
        .bind(&vehicle.driver_phone)
        .bind(&vehicle.freight_terms)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to finalize challan: {}", e)))?;

        for detail in &details {
            let consignment_id = detail.consignment_id.ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Dispatch challan detail {} has no consignment",
                    detail.lr_no
                ))
            })?;
            Self::transition_status(
                &mut tx,
                company_id,
                consignment_id,
                ConsignmentStatus::InLoading,
                ConsignmentStatus::InTransit,
            )
            .await?;
            Self::append_history(
                &mut tx,
                company_id,
                &detail.lr_no,
                HistoryAction::Dispatched,
                actor,
                &format!(
                    "Dispatched on challan {} by vehicle {}",
                    challan.challan_no, vehicle.vehicle_no
                ),
            )
            .await?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        CHALLAN_OPERATIONS
            .with_label_values(&["finalize", "ok"])
            .inc();

        info!(
            challan_id = %challan.challan_id,
            challan_no = %challan.challan_no,
            vehicle_no = %vehicle.vehicle_no,
            "Dispatch challan finalized"
        );

        Ok(challan)
    }

    // -------------------------------------------------------------------------
    // Inward challan
    // -------------------------------------------------------------------------

    /// Validate one LR against a caller-held inward working set. Read-only;
    /// the distinct error kinds let the caller show a precise message.
    #[instrument(skip(self, working_set), fields(company_id = %company_id, lr_no = %lr_no))]
    pub async fn inward_candidate(
        &self,
        company_id: Uuid,
        lr_no: &str,
        working_set: &[String],
    ) -> Result<Consignment, AppError> {
        if working_set.iter().any(|lr| lr == lr_no) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "LR {} is already in the inward working set",
                lr_no
            )));
        }

        let consignment = self
            .get_consignment_by_lr(company_id, lr_no)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("LR {} not found", lr_no)))?;

        if !consignment.parsed_status().is_some_and(|s| s.can_inward()) {
            return Err(AppError::StatusGuard(anyhow::anyhow!(
                "LR {} is '{}', only in-transit consignments can be inwarded",
                lr_no,
                consignment.status
            )));
        }

        Ok(consignment)
    }

    /// Save an inward challan as `finalized`, snapshotting one LR detail per
    /// working-set consignment and moving each to `in_stock`. With a
    /// `challan_id` in the draft this is an edit-in-place: the prior detail
    /// set is replaced, totals recomputed, and consignments dropped from the
    /// set revert to `in_transit` - all in one transaction.
    #[instrument(skip(self, draft, lr_nos), fields(company_id = %company_id, lr_count = lr_nos.len()))]
    pub async fn save_inward_challan(
        &self,
        company_id: Uuid,
        draft: &InwardChallanDraft,
        lr_nos: &[String],
        actor: &str,
    ) -> Result<(Challan, Vec<LrDetail>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_inward_challan"])
            .start_timer();

        if lr_nos.is_empty() && draft.externals.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "An inward challan needs at least one consignment"
            )));
        }
        {
            let mut seen = std::collections::HashSet::new();
            for lr in lr_nos
                .iter()
                .chain(draft.externals.iter().map(|e| &e.lr_no))
            {
                if !seen.insert(lr.as_str()) {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "LR {} appears twice in the working set",
                        lr
                    )));
                }
            }
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Edit-in-place: load the existing challan and its current set.
        let (challan_id, challan_no, previous_lrs) = match draft.challan_id {
            Some(id) => {
                let existing = sqlx::query_as::<_, Challan>(&format!(
                    "SELECT {CHALLAN_COLUMNS} FROM challans \
                     WHERE company_id = $1 AND challan_id = $2 FOR UPDATE"
                ))
                .bind(company_id)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to fetch challan: {}", e))
                })?
                .ok_or_else(|| {
                    AppError::NotFound(anyhow::anyhow!("Inward challan {} not found", id))
                })?;

                if existing.parsed_type() != Some(ChallanType::Inward) {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Challan {} is not an inward challan",
                        existing.challan_no
                    )));
                }

                let previous = Self::challan_details(&mut tx, company_id, id).await?;
                let previous_lrs: Vec<String> =
                    previous.iter().map(|d| d.lr_no.clone()).collect();
                (id, existing.challan_no, previous_lrs)
            }
            None => {
                let number =
                    Self::next_sequence(&mut tx, company_id, "inward_challan").await?;
                (Uuid::new_v4(), format!("IC-{:06}", number), Vec::new())
            }
        };

        let new_lrs: Vec<&str> = lr_nos
            .iter()
            .map(|lr| lr.as_str())
            .chain(draft.externals.iter().map(|e| e.lr_no.as_str()))
            .collect();
        let added: Vec<&String> = lr_nos
            .iter()
            .filter(|lr| !previous_lrs.contains(lr))
            .collect();
        let removed: Vec<&String> = previous_lrs
            .iter()
            .filter(|lr| !new_lrs.contains(&lr.as_str()))
            .collect();

        // Lock and guard every consignment in the new set.
        let consignments = sqlx::query_as::<_, Consignment>(&format!(
            "SELECT {CONSIGNMENT_COLUMNS} FROM consignments \
             WHERE company_id = $1 AND lr_no = ANY($2) FOR UPDATE"
        ))
        .bind(company_id)
        .bind(lr_nos)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to fetch consignments: {}", e))
        })?;

        if consignments.len() != lr_nos.len() {
            let found: std::collections::HashSet<&str> =
                consignments.iter().map(|c| c.lr_no.as_str()).collect();
            let missing = lr_nos.iter().find(|lr| !found.contains(lr.as_str()));
            return Err(AppError::NotFound(anyhow::anyhow!(
                "LR {} not found",
                missing.cloned().unwrap_or_default()
            )));
        }

        // An LR with a local record goes through the working set, not as an
        // external row; mixing the two would fork its status trail.
        if !draft.externals.is_empty() {
            let external_lrs: Vec<String> =
                draft.externals.iter().map(|e| e.lr_no.clone()).collect();
            let local: Vec<String> = sqlx::query_scalar(
                "SELECT lr_no FROM consignments WHERE company_id = $1 AND lr_no = ANY($2)",
            )
            .bind(company_id)
            .bind(&external_lrs)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to check external LRs: {}", e))
            })?;
            if let Some(lr) = local.first() {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "LR {} has a local record, add it through the working set",
                    lr
                )));
            }
        }

        for c in &consignments {
            // Only newly added members must satisfy the in-transit guard;
            // carried-over members are already in stock from the prior save.
            if added.iter().any(|lr| **lr == c.lr_no)
                && !c.parsed_status().is_some_and(|s| s.can_inward())
            {
                CHALLAN_OPERATIONS
                    .with_label_values(&["save_inward", "rejected"])
                    .inc();
                return Err(AppError::StatusGuard(anyhow::anyhow!(
                    "LR {} is '{}', only in-transit consignments can be inwarded",
                    c.lr_no,
                    c.status
                )));
            }
        }

        let ids: Vec<Uuid> = consignments.iter().map(|c| c.consignment_id).collect();
        let summaries = Self::line_summaries(&mut tx, &ids).await?;

        let mut details = Vec::with_capacity(consignments.len());
        for c in &consignments {
            let summary = summaries.get(&c.consignment_id);
            details.push(LrDetail {
                lr_detail_id: Uuid::new_v4(),
                challan_id,
                company_id,
                lr_no: c.lr_no.clone(),
                consignment_id: Some(c.consignment_id),
                from_station: c.origin_station.clone(),
                to_station: c.destination_station.clone(),
                description: summary.map(|s| s.description.clone()).unwrap_or_default(),
                quantity: summary.map(|s| s.quantity).unwrap_or(0),
                actual_weight: summary.map(|s| s.actual_weight).unwrap_or(Decimal::ZERO),
                charge_weight: summary.map(|s| s.charge_weight).unwrap_or(Decimal::ZERO),
                amount: c.total_amount,
            });
        }

        for e in &draft.externals {
            details.push(LrDetail {
                lr_detail_id: Uuid::new_v4(),
                challan_id,
                company_id,
                lr_no: e.lr_no.clone(),
                consignment_id: None,
                from_station: draft.from_station.clone(),
                to_station: draft.to_station.clone(),
                description: e.description.clone(),
                quantity: e.quantity,
                actual_weight: e.actual_weight,
                charge_weight: e.charge_weight,
                amount: e.amount,
            });
        }

        let totals = ChallanTotals::from_details(&details);

        let challan = sqlx::query_as::<_, Challan>(&format!(
            r#"
            INSERT INTO challans (challan_id, company_id, challan_no, challan_type, status,
                vehicle_no, driver_name, from_station, to_station, total_lr, total_packages,
                total_actual_weight, total_charge_weight, total_amount, finalized_utc)
            VALUES ($1, $2, $3, $4, 'finalized', $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            ON CONFLICT (challan_id)
            DO UPDATE SET vehicle_no = EXCLUDED.vehicle_no,
                driver_name = EXCLUDED.driver_name,
                from_station = EXCLUDED.from_station,
                to_station = EXCLUDED.to_station,
                total_lr = EXCLUDED.total_lr,
                total_packages = EXCLUDED.total_packages,
                total_actual_weight = EXCLUDED.total_actual_weight,
                total_charge_weight = EXCLUDED.total_charge_weight,
                total_amount = EXCLUDED.total_amount
            RETURNING {CHALLAN_COLUMNS}
            "#
        ))
        .bind(challan_id)
        .bind(company_id)
        .bind(&challan_no)
        .bind(ChallanType::Inward.as_str())
        .bind(&draft.vehicle_no)
        .bind(&draft.driver_name)
        .bind(&draft.from_station)
        .bind(&draft.to_station)
        .bind(totals.total_lr)
        .bind(totals.total_packages)
        .bind(totals.total_actual_weight)
        .bind(totals.total_charge_weight)
        .bind(totals.total_amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to save inward challan: {}", e))
        })?;

        // Replace the snapshot set: the prior details of an edited challan
        // are superseded, not layered on.
        sqlx::query("DELETE FROM lr_details WHERE challan_id = $1")
            .bind(challan_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear prior details: {}", e))
            })?;
        Self::insert_lr_details(&mut tx, &details).await?;

        for c in &consignments {
            if added.iter().any(|lr| **lr == c.lr_no) {
                Self::transition_status(
                    &mut tx,
                    company_id,
                    c.consignment_id,
                    ConsignmentStatus::InTransit,
                    ConsignmentStatus::InStock,
                )
                .await?;
                Self::append_history(
                    &mut tx,
                    company_id,
                    &c.lr_no,
                    HistoryAction::Inwarded,
                    actor,
                    &format!(
                        "Received at {} on inward challan {}",
                        draft.to_station, challan_no
                    ),
                )
                .await?;
            }
        }

        for lr in &removed {
            let consignment = sqlx::query_as::<_, Consignment>(&format!(
                "SELECT {CONSIGNMENT_COLUMNS} FROM consignments \
                 WHERE company_id = $1 AND lr_no = $2 FOR UPDATE"
            ))
            .bind(company_id)
            .bind(lr.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to fetch consignment: {}", e))
            })?;

            if let Some(c) = consignment {
                // Dropping an LR from the manifest undoes its receipt; that
                // only works while it is still sitting in stock here.
                Self::transition_status(
                    &mut tx,
                    company_id,
                    c.consignment_id,
                    ConsignmentStatus::InStock,
                    ConsignmentStatus::InTransit,
                )
                .await?;
                Self::append_history(
                    &mut tx,
                    company_id,
                    &c.lr_no,
                    HistoryAction::ReturnedToTransit,
                    actor,
                    &format!("Removed from inward challan {}, back in transit", challan_no),
                )
                .await?;
            }
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        CHALLAN_OPERATIONS
            .with_label_values(&["save_inward", "ok"])
            .inc();

        info!(
            challan_id = %challan.challan_id,
            challan_no = %challan.challan_no,
            total_lr = challan.total_lr,
            edited = draft.challan_id.is_some(),
            "Inward challan saved"
        );

        Ok((challan, details))
    }

    // -------------------------------------------------------------------------
    // Challan reads
    // -------------------------------------------------------------------------

    /// Get a challan with its LR-detail snapshots.
    #[instrument(skip(self), fields(company_id = %company_id, challan_id = %challan_id))]
    pub async fn get_challan(
        &self,
        company_id: Uuid,
        challan_id: Uuid,
    ) -> Result<Option<(Challan, Vec<LrDetail>)>, AppError> {
        let challan = sqlx::query_as::<_, Challan>(&format!(
            "SELECT {CHALLAN_COLUMNS} FROM challans \
             WHERE company_id = $1 AND challan_id = $2"
        ))
        .bind(company_id)
        .bind(challan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get challan: {}", e)))?;

        let challan = match challan {
            Some(c) => c,
            None => return Ok(None),
        };

        let details = sqlx::query_as::<_, LrDetail>(&format!(
            "SELECT {LR_DETAIL_COLUMNS} FROM lr_details \
             WHERE company_id = $1 AND challan_id = $2 ORDER BY lr_no"
        ))
        .bind(company_id)
        .bind(challan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get details: {}", e)))?;

        Ok(Some((challan, details)))
    }

    /// List challans for a company, newest first, optionally filtered.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn list_challans(
        &self,
        company_id: Uuid,
        challan_type: Option<ChallanType>,
        status: Option<crate::models::ChallanStatus>,
    ) -> Result<Vec<Challan>, AppError> {
        let challans = sqlx::query_as::<_, Challan>(&format!(
            r#"
            SELECT {CHALLAN_COLUMNS} FROM challans
            WHERE company_id = $1
              AND ($2::varchar IS NULL OR challan_type = $2)
              AND ($3::varchar IS NULL OR status = $3)
            ORDER BY created_utc DESC
            "#
        ))
        .bind(company_id)
        .bind(challan_type.map(|t| t.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list challans: {}", e)))?;

        Ok(challans)
    }

    async fn challan_details(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        challan_id: Uuid,
    ) -> Result<Vec<LrDetail>, AppError> {
        let details = sqlx::query_as::<_, LrDetail>(&format!(
            "SELECT {LR_DETAIL_COLUMNS} FROM lr_details \
             WHERE company_id = $1 AND challan_id = $2 ORDER BY lr_no"
        ))
        .bind(company_id)
        .bind(challan_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get details: {}", e)))?;
        Ok(details)
    }

    async fn insert_lr_details(
        tx: &mut Transaction<'_, Postgres>,
        details: &[LrDetail],
    ) -> Result<(), AppError> {
        for d in details {
            sqlx::query(
                r#"
                INSERT INTO lr_details (lr_detail_id, challan_id, company_id, lr_no,
                    consignment_id, from_station, to_station, description, quantity,
                    actual_weight, charge_weight, amount)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(d.lr_detail_id)
            .bind(d.challan_id)
            .bind(d.company_id)
            .bind(&d.lr_no)
            .bind(d.consignment_id)
            .bind(&d.from_station)
            .bind(&d.to_station)
            .bind(&d.description)
            .bind(d.quantity)
            .bind(d.actual_weight)
            .bind(d.charge_weight)
            .bind(d.amount)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert LR detail: {}", e))
            })?;
        }
        Ok(())
    }

    /// Guarded status flip. Zero rows affected means the consignment left
    /// the expected state since it was read, so the whole transaction must
    /// fail rather than half-apply.
    async fn transition_status(
        tx: &mut Transaction<'_, Postgres>,
        company_id: Uuid,
        consignment_id: Uuid,
        from: ConsignmentStatus,
        to: ConsignmentStatus,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE consignments
            SET status = $3, updated_utc = NOW()
            WHERE company_id = $1 AND consignment_id = $2 AND status = $4
            "#,
        )
        .bind(company_id)
        .bind(consignment_id)
        .bind(to.as_str())
        .bind(from.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update status: {}", e)))?;

        if result.rows_affected() != 1 {
            return Err(AppError::StatusGuard(anyhow::anyhow!(
                "Consignment {} is no longer '{}'",
                consignment_id,
                from.as_str()
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Delivery
    // -------------------------------------------------------------------------

    /// Reconcile delivery of a consignment's line items. The allocation
    /// must close every line exactly; the derived status, per-line
    /// quantities, delivery memo number, charges, and history entry are
    /// committed together.
    #[instrument(skip(self, allocations, charges, meta), fields(company_id = %company_id, consignment_id = %consignment_id))]
    pub async fn confirm_delivery(
        &self,
        company_id: Uuid,
        consignment_id: Uuid,
        allocations: &[DeliveryAllocation],
        charges: DeliveryCharges,
        meta: &DeliveryMeta,
        actor: &str,
    ) -> Result<(Consignment, Vec<LineItem>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["confirm_delivery"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let consignment = sqlx::query_as::<_, Consignment>(&format!(
            "SELECT {CONSIGNMENT_COLUMNS} FROM consignments \
             WHERE company_id = $1 AND consignment_id = $2 FOR UPDATE"
        ))
        .bind(company_id)
        .bind(consignment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch consignment: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Consignment {} not found", consignment_id))
        })?;

        if !consignment.parsed_status().is_some_and(|s| s.can_deliver()) {
            return Err(AppError::StatusGuard(anyhow::anyhow!(
                "Consignment {} is '{}', only in-stock or held consignments can be delivered",
                consignment.lr_no,
                consignment.status
            )));
        }

        let line_items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT line_item_id, consignment_id, line_no, description, quantity,
                actual_weight, charge_weight, delivered_qty, return_qty
            FROM line_items
            WHERE consignment_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(consignment_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))?;

        let outcome = reconcile_delivery(
            &line_items,
            allocations,
            meta.received_by.as_deref(),
        )
        .map_err(|problem| AppError::Allocation(anyhow::anyhow!("{problem}")))?;

        let any_delivered = outcome.lines.iter().any(|l| l.delivered_qty > 0);
        if any_delivered && meta.delivered_date.is_none() {
            return Err(AppError::Allocation(anyhow::anyhow!(
                "a delivery date is required when any quantity is delivered"
            )));
        }

        for line in &outcome.lines {
            sqlx::query(
                r#"
                UPDATE line_items
                SET delivered_qty = $2, return_qty = $3
                WHERE line_item_id = $1
                "#,
            )
            .bind(line.line_item_id)
            .bind(line.delivered_qty)
            .bind(line.return_qty)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update line item: {}", e))
            })?;
        }

        let memo_number = Self::next_sequence(&mut tx, company_id, "delivery_memo").await?;
        let memo_no = format!("DM-{:06}", memo_number);

        let updated = sqlx::query_as::<_, Consignment>(&format!(
            r#"
            UPDATE consignments
            SET status = $3,
                delivery_memo_no = $4,
                received_by = $5,
                delivered_date = $6,
                unloading_charge = $7,
                other_charge = $8,
                delivery_remarks = $9,
                updated_utc = NOW()
            WHERE company_id = $1 AND consignment_id = $2
            RETURNING {CONSIGNMENT_COLUMNS}
            "#
        ))
        .bind(company_id)
        .bind(consignment_id)
        .bind(outcome.status.as_str())
        .bind(&memo_no)
        .bind(&meta.received_by)
        .bind(meta.delivered_date)
        .bind(charges.unloading_charge)
        .bind(charges.other_charge)
        .bind(&meta.remarks)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update consignment: {}", e)))?;

        let delivered_total: i32 = outcome.lines.iter().map(|l| l.delivered_qty).sum();
        let returned_total: i32 = outcome.lines.iter().map(|l| l.return_qty).sum();
        let action = match outcome.status {
            ConsignmentStatus::Delivered => HistoryAction::Delivered,
            _ => HistoryAction::PartiallyDelivered,
        };
        Self::append_history(
            &mut tx,
            company_id,
            &updated.lr_no,
            action,
            actor,
            &format!(
                "Memo {}: delivered {}, returned {}, received by {}{}",
                memo_no,
                delivered_total,
                returned_total,
                meta.received_by.as_deref().unwrap_or("-"),
                meta.remarks
                    .as_deref()
                    .map(|r| format!("; {}", r))
                    .unwrap_or_default()
            ),
        )
        .await?;

        let updated_items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT line_item_id, consignment_id, line_no, description, quantity,
                actual_weight, charge_weight, delivered_qty, return_qty
            FROM line_items
            WHERE consignment_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(consignment_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reload line items: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            consignment_id = %updated.consignment_id,
            lr_no = %updated.lr_no,
            status = %updated.status,
            memo_no = %memo_no,
            "Delivery reconciled"
        );

        Ok((updated, updated_items))
    }

    /// Quick path: full delivery of every line item with no returns.
    /// Builds the closed allocation set and runs the same guarded path as
    /// [`confirm_delivery`].
    #[instrument(skip(self, meta), fields(company_id = %company_id, consignment_id = %consignment_id))]
    pub async fn mark_delivered(
        &self,
        company_id: Uuid,
        consignment_id: Uuid,
        meta: &DeliveryMeta,
        actor: &str,
    ) -> Result<(Consignment, Vec<LineItem>), AppError> {
        let line_items = self.get_line_items(consignment_id).await?;
        if line_items.is_empty() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Consignment {} not found",
                consignment_id
            )));
        }
        let allocations = full_delivery_allocations(&line_items);
        self.confirm_delivery(
            company_id,
            consignment_id,
            &allocations,
            DeliveryCharges::default(),
            meta,
            actor,
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Administrative transitions
    // -------------------------------------------------------------------------

    /// Administrative cancellation. Allowed from any non-terminal state;
    /// the prior status is recorded in the history entry.
    #[instrument(skip(self), fields(company_id = %company_id, consignment_id = %consignment_id))]
    pub async fn cancel_consignment(
        &self,
        company_id: Uuid,
        consignment_id: Uuid,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<Consignment, AppError> {
        self.administrative_transition(
            company_id,
            consignment_id,
            |s| s.can_cancel(),
            ConsignmentStatus::Cancelled,
            HistoryAction::Cancelled,
            reason,
            actor,
        )
        .await
    }

    /// Put an in-stock consignment on hold.
    #[instrument(skip(self), fields(company_id = %company_id, consignment_id = %consignment_id))]
    pub async fn hold_consignment(
        &self,
        company_id: Uuid,
        consignment_id: Uuid,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<Consignment, AppError> {
        self.administrative_transition(
            company_id,
            consignment_id,
            |s| s.can_hold(),
            ConsignmentStatus::InHold,
            HistoryAction::Held,
            reason,
            actor,
        )
        .await
    }

    /// Release a held consignment back into stock.
    #[instrument(skip(self), fields(company_id = %company_id, consignment_id = %consignment_id))]
    pub async fn release_consignment(
        &self,
        company_id: Uuid,
        consignment_id: Uuid,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<Consignment, AppError> {
        self.administrative_transition(
            company_id,
            consignment_id,
            |s| s.can_release(),
            ConsignmentStatus::InStock,
            HistoryAction::Released,
            reason,
            actor,
        )
        .await
    }

    async fn administrative_transition(
        &self,
        company_id: Uuid,
        consignment_id: Uuid,
        guard: impl Fn(ConsignmentStatus) -> bool,
        to: ConsignmentStatus,
        action: HistoryAction,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<Consignment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["administrative_transition"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let consignment = sqlx::query_as::<_, Consignment>(&format!(
            "SELECT {CONSIGNMENT_COLUMNS} FROM consignments \
             WHERE company_id = $1 AND consignment_id = $2 FOR UPDATE"
        ))
        .bind(company_id)
        .bind(consignment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch consignment: {}", e)))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Consignment {} not found", consignment_id))
        })?;

        let previous = consignment.status.clone();
        if !consignment.parsed_status().is_some_and(&guard) {
            return Err(AppError::StatusGuard(anyhow::anyhow!(
                "Consignment {} is '{}' and cannot move to '{}'",
                consignment.lr_no,
                previous,
                to.as_str()
            )));
        }

        let updated = sqlx::query_as::<_, Consignment>(&format!(
            r#"
            UPDATE consignments
            SET status = $3, updated_utc = NOW()
            WHERE company_id = $1 AND consignment_id = $2
            RETURNING {CONSIGNMENT_COLUMNS}
            "#
        ))
        .bind(company_id)
        .bind(consignment_id)
        .bind(to.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update status: {}", e)))?;

        Self::append_history(
            &mut tx,
            company_id,
            &updated.lr_no,
            action,
            actor,
            &format!(
                "Status changed from '{}'{}",
                previous,
                reason.map(|r| format!(": {}", r)).unwrap_or_default()
            ),
        )
        .await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();

        info!(
            consignment_id = %updated.consignment_id,
            lr_no = %updated.lr_no,
            status = %updated.status,
            "Administrative transition applied"
        );

        Ok(updated)
    }

    // -------------------------------------------------------------------------
    // Stock view
    // -------------------------------------------------------------------------

    /// Compose the current-stock view: store-backed rows (in stock, in
    /// loading, in hold) merged with rows synthesized from inward LR
    /// details that never produced a local inward consignment record.
    /// Derived and recomputed on every call, never cached.
    #[instrument(skip(self), fields(company_id = %company_id))]
    pub async fn current_stock(&self, company_id: Uuid) -> Result<Vec<StockItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["current_stock"])
            .start_timer();

        let consignments = sqlx::query_as::<_, Consignment>(&format!(
            r#"
            SELECT {CONSIGNMENT_COLUMNS} FROM consignments
            WHERE company_id = $1 AND status IN ('in_stock', 'in_loading', 'in_hold')
            ORDER BY lr_no
            "#
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fetch stock rows: {}", e)))?;

        let ids: Vec<Uuid> = consignments.iter().map(|c| c.consignment_id).collect();
        let aggregates: Vec<(Uuid, i64, Decimal, Decimal)> = sqlx::query_as(
            r#"
            SELECT consignment_id,
                   COALESCE(SUM(quantity), 0) AS quantity,
                   COALESCE(SUM(actual_weight), 0) AS actual_weight,
                   COALESCE(SUM(charge_weight), 0) AS charge_weight
            FROM line_items
            WHERE consignment_id = ANY($1)
            GROUP BY consignment_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to aggregate line items: {}", e))
        })?;

        let sums: HashMap<Uuid, (i64, Decimal, Decimal)> = aggregates
            .into_iter()
            .map(|(id, qty, actual, charge)| (id, (qty, actual, charge)))
            .collect();

        let store_rows: Vec<(Consignment, i32, Decimal, Decimal)> = consignments
            .into_iter()
            .map(|c| {
                let (qty, actual, charge) = sums
                    .get(&c.consignment_id)
                    .copied()
                    .unwrap_or((0, Decimal::ZERO, Decimal::ZERO));
                (c, qty as i32, actual, charge)
            })
            .collect();

        // Inward snapshots whose LR never became a local inward record: the
        // receipt is implied by the manifest but not yet consumed.
        let inward_details = sqlx::query_as::<_, LrDetail>(&format!(
            r#"
            SELECT {lr_cols} FROM lr_details ld
            JOIN challans ch ON ch.challan_id = ld.challan_id
            WHERE ld.company_id = $1
              AND ch.challan_type = 'inward'
              AND ld.consignment_id IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM consignments c
                  WHERE c.company_id = ld.company_id
                    AND c.lr_no = ld.lr_no
                    AND c.source = 'inward'
              )
            "#,
            lr_cols = "ld.lr_detail_id, ld.challan_id, ld.company_id, ld.lr_no, \
                 ld.consignment_id, ld.from_station, ld.to_station, ld.description, \
                 ld.quantity, ld.actual_weight, ld.charge_weight, ld.amount"
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to fetch inward snapshots: {}", e))
        })?;

        timer.observe_duration();

        Ok(merge_stock(store_rows, inward_details))
    }
}

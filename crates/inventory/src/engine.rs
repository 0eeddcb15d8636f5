//! Per-line and per-document validation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::{join_all, try_join_all};
use rust_decimal::Decimal;
use tracing::debug;

use forgeerp_core::{Clock, ErrorCode, ReservationId, ReservedQuantityProvider};
use forgeerp_locking::LockManager;

use crate::batch::{AllocatedBatch, AllocatedBatchLine, AvailableBatch, RequestedBatch};
use crate::issues::{LineIssue, LineWarning, StockBreakdown, WarningCode};
use crate::ordering::{allocate_greedy, sort_batches};
use crate::sources::{ItemMetadataSource, SourceError, StockSource};
use crate::validation::{DocumentValidation, LineRequest, LineValidation};
use crate::{MAX_ALTERNATIVES, QUANTITY_TOLERANCE};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lease length for locks taken by pre-post validation.
    pub posting_lock_duration: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            posting_lock_duration: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn with_posting_lock_duration(mut self, duration: Duration) -> Self {
        self.posting_lock_duration = duration;
        self
    }
}

/// Batch allocation engine.
///
/// Holds no mutable state besides the batch-managed cache; lines can be
/// validated concurrently.
pub struct BatchAllocationEngine {
    stock: Arc<dyn StockSource>,
    items: Arc<dyn ItemMetadataSource>,
    reserved: Arc<dyn ReservedQuantityProvider>,
    pub(crate) locks: Arc<LockManager>,
    clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
    /// Item code -> batch-managed flag. Never expires on its own; see
    /// [`BatchAllocationEngine::invalidate_item`].
    batch_managed: DashMap<String, bool>,
}

impl core::fmt::Debug for BatchAllocationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchAllocationEngine")
            .field("config", &self.config)
            .field("cached_items", &self.batch_managed.len())
            .finish()
    }
}

/// Stock taken by earlier lines of the same document for one item and
/// warehouse.
#[derive(Debug, Default)]
struct Claimed {
    quantity: Decimal,
    batches: HashMap<String, Decimal>,
}

impl Claimed {
    fn record(&mut self, allocation: &AllocatedBatchLine) {
        if allocation.batch_managed {
            for batch in &allocation.batches {
                *self.batches.entry(batch.batch_number.clone()).or_default() += batch.quantity_allocated;
            }
        } else {
            self.quantity += allocation.total_allocated;
        }
    }

    fn batch(&self, batch_number: &str) -> Decimal {
        self.batches.get(batch_number).copied().unwrap_or_default()
    }
}

/// Batch quantities with reservations of other documents subtracted.
struct EffectiveBatches {
    batches: Vec<AvailableBatch>,
    physical: Decimal,
    reserved: Decimal,
}

impl BatchAllocationEngine {
    pub fn new(
        stock: Arc<dyn StockSource>,
        items: Arc<dyn ItemMetadataSource>,
        reserved: Arc<dyn ReservedQuantityProvider>,
        locks: Arc<LockManager>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            stock,
            items,
            reserved,
            locks,
            clock,
            config,
            batch_managed: DashMap::new(),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Forget the cached batch-managed flag of one item.
    pub fn invalidate_item(&self, item_code: &str) {
        self.batch_managed.remove(item_code);
    }

    /// Forget every cached batch-managed flag.
    pub fn clear_cache(&self) {
        self.batch_managed.clear();
    }

    /// Validate one line and compute its batch allocation.
    pub async fn validate_and_allocate(&self, line: &LineRequest) -> Result<LineValidation, SourceError> {
        self.validate_line(line, None, &Claimed::default()).await
    }

    /// Same as [`Self::validate_and_allocate`], ignoring stock held by `exclude`.
    pub async fn validate_and_allocate_excluding(
        &self,
        line: &LineRequest,
        exclude: ReservationId,
    ) -> Result<LineValidation, SourceError> {
        self.validate_line(line, Some(exclude), &Claimed::default()).await
    }

    /// Validate a document and aggregate the results in line order.
    ///
    /// Lines for different item/warehouse pairs are validated concurrently.
    /// Lines sharing a pair run in line order, each seeing the stock left by
    /// the ones before it.
    pub async fn validate_document(&self, lines: &[LineRequest]) -> Result<DocumentValidation, SourceError> {
        self.validate_lines(lines, None).await
    }

    pub async fn validate_document_excluding(
        &self,
        lines: &[LineRequest],
        exclude: ReservationId,
    ) -> Result<DocumentValidation, SourceError> {
        self.validate_lines(lines, Some(exclude)).await
    }

    pub(crate) async fn validate_lines(
        &self,
        lines: &[LineRequest],
        exclude: Option<ReservationId>,
    ) -> Result<DocumentValidation, SourceError> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut group_of: HashMap<(&str, &str), usize> = HashMap::new();
        for (index, line) in lines.iter().enumerate() {
            let key = (line.item_code.as_str(), line.warehouse_code.as_str());
            let group = *group_of.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[group].push(index);
        }

        let results = join_all(groups.iter().map(|indices| self.validate_group(lines, indices, exclude))).await;

        let mut slots: Vec<Option<LineValidation>> = (0..lines.len()).map(|_| None).collect();
        for (indices, validated) in groups.iter().zip(results) {
            for (index, line) in indices.iter().zip(validated?) {
                slots[*index] = Some(line);
            }
        }
        Ok(DocumentValidation::from_lines(slots.into_iter().flatten().collect()))
    }

    async fn validate_group(
        &self,
        lines: &[LineRequest],
        indices: &[usize],
        exclude: Option<ReservationId>,
    ) -> Result<Vec<LineValidation>, SourceError> {
        let mut claimed = Claimed::default();
        let mut validated = Vec::with_capacity(indices.len());
        for &index in indices {
            let result = self.validate_line(&lines[index], exclude, &claimed).await?;
            if let Some(allocation) = result.allocation.as_ref().filter(|_| result.is_valid()) {
                claimed.record(allocation);
            }
            validated.push(result);
        }
        Ok(validated)
    }

    async fn validate_line(
        &self,
        line: &LineRequest,
        exclude: Option<ReservationId>,
        claimed: &Claimed,
    ) -> Result<LineValidation, SourceError> {
        let mut out = LineValidation::new(line.line_number);
        let issue = |code: ErrorCode, message: String| {
            LineIssue::new(code, line.line_number, &line.item_code, &line.warehouse_code, message)
        };

        if line.warehouse_code.trim().is_empty() {
            out.reject(issue(
                ErrorCode::WarehouseRequired,
                format!("line {}: warehouse code is required", line.line_number),
            ));
            return Ok(out);
        }
        if line.quantity <= Decimal::ZERO {
            out.reject(issue(
                ErrorCode::InvalidQuantity,
                format!("line {}: quantity must be positive (got {})", line.line_number, line.quantity),
            ));
            return Ok(out);
        }

        let factor = self.conversion_factor(line).await?;
        let needed = line.quantity * factor;

        let Some(batch_managed) = self.is_batch_managed(&line.item_code).await? else {
            out.reject(issue(
                ErrorCode::ItemNotFound,
                format!("item {} does not exist", line.item_code),
            ));
            return Ok(out);
        };

        let base = AllocatedBatchLine {
            line_number: line.line_number,
            item_code: line.item_code.clone(),
            warehouse_code: line.warehouse_code.clone(),
            requested_quantity: line.quantity,
            uom_code: line.uom_code.clone(),
            conversion_factor: factor,
            inventory_quantity: needed,
            total_allocated: Decimal::ZERO,
            batch_managed,
            batches: Vec::new(),
        };

        if !batch_managed {
            if !line.batches.is_empty() {
                out.warn(LineWarning::new(
                    WarningCode::BatchesIgnored,
                    line.line_number,
                    format!(
                        "item {} is not batch-managed; {} batch picks were ignored",
                        line.item_code,
                        line.batches.len()
                    ),
                ));
            }
            self.check_plain_stock(line, base, exclude, claimed, &mut out).await?;
        } else if !line.batches.is_empty() {
            self.check_explicit_batches(line, base, exclude, claimed, &mut out).await?;
        } else if line.auto_allocate {
            self.auto_allocate(line, base, exclude, claimed, &mut out).await?;
        } else {
            out.reject(issue(
                ErrorCode::BatchAllocationRequired,
                format!(
                    "item {} is batch-managed: batches must be selected or auto-allocated",
                    line.item_code
                ),
            ));
        }

        Ok(out)
    }

    async fn check_plain_stock(
        &self,
        line: &LineRequest,
        mut allocation: AllocatedBatchLine,
        exclude: Option<ReservationId>,
        claimed: &Claimed,
        out: &mut LineValidation,
    ) -> Result<(), SourceError> {
        let physical = self
            .stock
            .available_quantity(&line.item_code, &line.warehouse_code)
            .await?;
        // Earlier lines of this document count as reserved.
        let reserved = self
            .reserved
            .reserved_quantity(&line.item_code, &line.warehouse_code, exclude)
            .await?
            + claimed.quantity;
        let available = physical - reserved;
        let needed = allocation.inventory_quantity;

        if available < needed {
            debug!(
                item = %line.item_code,
                warehouse = %line.warehouse_code,
                %physical,
                %reserved,
                %needed,
                "insufficient stock"
            );
            out.reject(
                LineIssue::new(
                    ErrorCode::InsufficientTotalStock,
                    line.line_number,
                    &line.item_code,
                    &line.warehouse_code,
                    format!(
                        "item {} in {}: needed {}, available {} (physical {}, reserved {})",
                        line.item_code, line.warehouse_code, needed, available, physical, reserved
                    ),
                )
                .with_stock(StockBreakdown {
                    physical,
                    reserved,
                    available,
                })
                .with_quantities(needed, available),
            );
            return Ok(());
        }

        allocation.total_allocated = needed;
        out.accept(allocation);
        Ok(())
    }

    async fn check_explicit_batches(
        &self,
        line: &LineRequest,
        mut allocation: AllocatedBatchLine,
        exclude: Option<ReservationId>,
        claimed: &Claimed,
        out: &mut LineValidation,
    ) -> Result<(), SourceError> {
        let mut effective = self.effective_batches(line, exclude, claimed).await?;
        sort_batches(&mut effective.batches, line.strategy);
        let by_number: HashMap<&str, &AvailableBatch> = effective
            .batches
            .iter()
            .map(|b| (b.batch_number.as_str(), b))
            .collect();
        let today = self.clock.now().date_naive();
        let needed = allocation.inventory_quantity;

        let mut picked: Vec<AllocatedBatch> = Vec::new();
        for requested in merge_requested(&line.batches) {
            let issue = |code: ErrorCode, message: String| {
                LineIssue::new(code, line.line_number, &line.item_code, &line.warehouse_code, message)
                    .with_batch(requested.batch_number.clone())
            };

            if requested.quantity <= Decimal::ZERO {
                out.reject(issue(
                    ErrorCode::InvalidQuantity,
                    format!(
                        "batch {}: quantity must be positive (got {})",
                        requested.batch_number, requested.quantity
                    ),
                ));
                continue;
            }

            let Some(batch) = by_number.get(requested.batch_number.as_str()) else {
                out.reject(
                    issue(
                        ErrorCode::BatchNotFound,
                        format!(
                            "batch {} of item {} has no stock in {}",
                            requested.batch_number, line.item_code, line.warehouse_code
                        ),
                    )
                    .with_alternatives(alternatives(&effective.batches, &requested.batch_number)),
                );
                continue;
            };

            if requested.quantity > batch.available_quantity {
                out.reject(
                    issue(
                        ErrorCode::InsufficientBatchQuantity,
                        format!(
                            "batch {}: requested {}, available {}",
                            requested.batch_number, requested.quantity, batch.available_quantity
                        ),
                    )
                    .with_quantities(requested.quantity, batch.available_quantity)
                    .with_alternatives(alternatives(&effective.batches, &requested.batch_number)),
                );
                continue;
            }

            if batch.is_expired(today) {
                out.warn(
                    LineWarning::new(
                        WarningCode::ExpiredBatch,
                        line.line_number,
                        format!(
                            "batch {} expired on {}",
                            batch.batch_number,
                            batch.expiry_date.map(|d| d.to_string()).unwrap_or_default()
                        ),
                    )
                    .with_batch(batch.batch_number.clone()),
                );
            }

            picked.push(AllocatedBatch {
                batch_number: batch.batch_number.clone(),
                quantity_allocated: requested.quantity,
                available_before: batch.available_quantity,
                remaining_after: batch.available_quantity - requested.quantity,
                allocation_order: picked.len() as u32 + 1,
                expiry_date: batch.expiry_date,
            });
        }

        let requested_total: Decimal = line.batches.iter().map(|b| b.quantity).sum();
        if (requested_total - needed).abs() > QUANTITY_TOLERANCE {
            out.reject(
                LineIssue::new(
                    ErrorCode::BatchQuantityMismatch,
                    line.line_number,
                    &line.item_code,
                    &line.warehouse_code,
                    format!(
                        "line {}: batch quantities add up to {} but the line needs {}",
                        line.line_number, requested_total, needed
                    ),
                )
                .with_quantities(needed, requested_total),
            );
        }

        allocation.total_allocated = picked.iter().map(|b| b.quantity_allocated).sum();
        allocation.batches = picked;
        out.accept(allocation);
        Ok(())
    }

    async fn auto_allocate(
        &self,
        line: &LineRequest,
        mut allocation: AllocatedBatchLine,
        exclude: Option<ReservationId>,
        claimed: &Claimed,
        out: &mut LineValidation,
    ) -> Result<(), SourceError> {
        let mut effective = self.effective_batches(line, exclude, claimed).await?;
        sort_batches(&mut effective.batches, line.strategy);
        effective.batches.retain(|b| b.available_quantity > Decimal::ZERO);

        let needed = allocation.inventory_quantity;
        let available: Decimal = effective.batches.iter().map(|b| b.available_quantity).sum();

        if available < needed {
            out.reject(
                LineIssue::new(
                    ErrorCode::InsufficientTotalStock,
                    line.line_number,
                    &line.item_code,
                    &line.warehouse_code,
                    format!(
                        "item {} in {}: needed {}, {} available across {} batches",
                        line.item_code,
                        line.warehouse_code,
                        needed,
                        available,
                        effective.batches.len()
                    ),
                )
                .with_stock(StockBreakdown {
                    physical: effective.physical,
                    reserved: effective.reserved,
                    available,
                })
                .with_quantities(needed, available)
                .with_alternatives(effective.batches.iter().take(MAX_ALTERNATIVES).cloned().collect()),
            );
            return Ok(());
        }

        let today = self.clock.now().date_naive();
        let picked = allocate_greedy(&effective.batches, needed);
        for batch in &picked {
            if batch.expiry_date.is_some_and(|d| d < today) {
                out.warn(
                    LineWarning::new(
                        WarningCode::ExpiredBatch,
                        line.line_number,
                        format!("auto-allocation used expired batch {}", batch.batch_number),
                    )
                    .with_batch(batch.batch_number.clone()),
                );
            }
        }

        allocation.total_allocated = picked.iter().map(|b| b.quantity_allocated).sum();
        allocation.batches = picked;
        out.accept(allocation);
        Ok(())
    }

    /// Fetch batches and subtract what live reservations and earlier lines of
    /// the same document already hold.
    async fn effective_batches(
        &self,
        line: &LineRequest,
        exclude: Option<ReservationId>,
        claimed: &Claimed,
    ) -> Result<EffectiveBatches, SourceError> {
        let batches = self
            .stock
            .available_batches(&line.item_code, &line.warehouse_code)
            .await?;

        let reserved = try_join_all(batches.iter().map(|b| {
            self.reserved.reserved_batch_quantity(
                &line.item_code,
                &line.warehouse_code,
                &b.batch_number,
                exclude,
            )
        }))
        .await?;

        let physical: Decimal = batches.iter().map(|b| b.available_quantity).sum();
        let mut reserved_total = Decimal::ZERO;
        let batches = batches
            .into_iter()
            .zip(reserved)
            .map(|(mut batch, held)| {
                let held = held + claimed.batch(&batch.batch_number);
                reserved_total += held;
                batch.available_quantity -= held;
                batch
            })
            .collect();

        Ok(EffectiveBatches {
            batches,
            physical,
            reserved: reserved_total,
        })
    }

    async fn conversion_factor(&self, line: &LineRequest) -> Result<Decimal, SourceError> {
        let Some(uom) = line.uom_code.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(Decimal::ONE);
        };
        let factor = self.items.uom_conversion(&line.item_code, uom).await?;
        Ok(factor.filter(|f| *f > Decimal::ZERO).unwrap_or(Decimal::ONE))
    }

    async fn is_batch_managed(&self, item_code: &str) -> Result<Option<bool>, SourceError> {
        if let Some(cached) = self.batch_managed.get(item_code) {
            return Ok(Some(*cached));
        }
        let flag = self.items.is_batch_managed(item_code).await?;
        if let Some(flag) = flag {
            self.batch_managed.insert(item_code.to_string(), flag);
        }
        Ok(flag)
    }
}

/// Sum duplicate picks of the same batch, keeping first-seen order.
fn merge_requested(requested: &[RequestedBatch]) -> Vec<RequestedBatch> {
    let mut merged: Vec<RequestedBatch> = Vec::with_capacity(requested.len());
    for pick in requested {
        match merged.iter_mut().find(|m| m.batch_number == pick.batch_number) {
            Some(existing) => existing.quantity += pick.quantity,
            None => merged.push(pick.clone()),
        }
    }
    merged
}

fn alternatives(sorted: &[AvailableBatch], excluding: &str) -> Vec<AvailableBatch> {
    sorted
        .iter()
        .filter(|b| b.batch_number != excluding && b.available_quantity > Decimal::ZERO)
        .take(MAX_ALTERNATIVES)
        .cloned()
        .collect()
}

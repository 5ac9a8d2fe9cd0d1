use std::future::Future;
use std::sync::Arc;
use tokio::sync::{ watch, Mutex };
use tokio::task::JoinHandle;
use tokio::time::{ interval, Duration, MissedTickBehavior };

use crate::config::SettlementConfig;
use crate::error::Result;
use crate::pipelines::{ CreditPipeline, DepositPipeline, RedeemPipeline };
use crate::reconciler::Reconciler;

/// Drives the periodic sweeps. Each sweep is single-flight: a tick that finds
/// the previous run still busy is skipped, not queued.
pub struct Scheduler {
    deposits: Arc<DepositPipeline>,
    redeems: Arc<RedeemPipeline>,
    credits: Arc<CreditPipeline>,
    reconciler: Arc<Reconciler>,
    config: SettlementConfig,
}

impl Scheduler {
    pub fn new(
        deposits: Arc<DepositPipeline>,
        redeems: Arc<RedeemPipeline>,
        credits: Arc<CreditPipeline>,
        reconciler: Arc<Reconciler>,
        config: SettlementConfig
    ) -> Self {
        Self {
            deposits,
            redeems,
            credits,
            reconciler,
            config,
        }
    }

    pub fn start(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let deposits = self.deposits.clone();
        let escrow = spawn_sweep("escrow", self.config.escrow_sweep_interval, shutdown.clone(), move || {
            let deposits = deposits.clone();
            async move { deposits.run_escrow_sweep().await }
        });

        let deposits = self.deposits.clone();
        let mint = spawn_sweep("mint", self.config.mint_sweep_interval, shutdown.clone(), move || {
            let deposits = deposits.clone();
            async move { deposits.run_mint_sweep().await }
        });

        let redeems = self.redeems.clone();
        let payout = spawn_sweep("payout", self.config.payout_sweep_interval, shutdown.clone(), move || {
            let redeems = redeems.clone();
            async move { redeems.run_payout_sweep().await }
        });

        let credits = self.credits.clone();
        let expiry = spawn_sweep(
            "credit_expiry",
            self.config.credit_expiry_interval,
            shutdown.clone(),
            move || {
                let credits = credits.clone();
                async move { credits.run_credit_expiry(chrono::Utc::now()).await }
            }
        );

        let reconciler = self.reconciler.clone();
        let reconcile = spawn_sweep("reconcile", self.config.reconcile_interval, shutdown, move || {
            let reconciler = reconciler.clone();
            async move { reconciler.run().await.map(|report| report.requeued + report.escalated) }
        });

        vec![escrow, mint, payout, expiry, reconcile]
    }
}

/// Run `sweep` every `period` until `shutdown` flips.
fn spawn_sweep<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    sweep: F
) -> JoinHandle<()>
    where F: Fn() -> Fut + Send + Sync + 'static, Fut: Future<Output = Result<usize>> + Send + 'static
{
    tokio::spawn(async move {
        let guard = Arc::new(Mutex::new(()));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(sweep = name, period_ms = period.as_millis() as u64, "Sweep started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    break;
                }
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let Ok(running) = guard.clone().try_lock_owned() else {
                tracing::debug!(sweep = name, "Previous run still busy, skipping tick");
                continue;
            };

            let run = sweep();
            tokio::spawn(async move {
                let _running = running;
                match run.await {
                    Ok(0) => {}
                    Ok(processed) => tracing::debug!(sweep = name, processed, "Sweep finished"),
                    Err(err) => tracing::warn!(sweep = name, error = %err, "Sweep failed"),
                }
            });
        }

        // Let an in-flight run finish before reporting the sweep as stopped
        let _ = guard.lock().await;
        tracing::info!(sweep = name, "Sweep stopped");
    })
}

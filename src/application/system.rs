//! Application wiring: build every component from configuration, hand the
//! shared gateway around by reference, and run the scheduler.

use crate::application::evaluator::{EvaluatorConfig, StrategyEvaluator};
use crate::application::funnel::{FunnelConfig, OpportunityFunnel};
use crate::application::guard::{GuardConfig, OvernightGuard};
use crate::application::intelligence::MarketIntelligence;
use crate::application::lifecycle::emergency::{EmergencyConfig, EmergencyStop};
use crate::application::lifecycle::orders::OrderLifecycle;
use crate::application::lifecycle::protection::ProtectionReconciler;
use crate::application::scheduler::Scheduler;
use crate::config::Config;
use crate::domain::risk::engine::RiskEngine;
use crate::infrastructure::broker::gateway::{BrokerGateway, GatewayConfig, HttpTransport};
use crate::infrastructure::oracle::{DisabledOracle, HttpOracle, IntelligenceOracle};
use crate::infrastructure::persistence::state_store::StateStore;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

const BROKER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Application {
    scheduler: Scheduler,
    shutdown_tx: watch::Sender<bool>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Application> {
        let transport = Arc::new(HttpTransport::new(&config.broker, BROKER_REQUEST_TIMEOUT));
        let gateway = Arc::new(BrokerGateway::new(
            transport,
            GatewayConfig {
                stale_quote_max: chrono::Duration::minutes(config.stale_quote_max_minutes),
                rate_limit_per_minute: config.rate_limit_per_minute,
                rate_limit_utilization: config.rate_limit_utilization,
                ..GatewayConfig::default()
            },
        ));

        let oracle: Arc<dyn IntelligenceOracle> = match &config.oracle_url {
            Some(url) => {
                info!("Application: intelligence oracle at {}", url);
                Arc::new(HttpOracle::new(url.clone()))
            }
            None => {
                info!("Application: no oracle configured, local scoring only");
                Arc::new(DisabledOracle)
            }
        };

        let store = StateStore::new(&config.state_dir)?;
        let ledger = match store.load_pdt_ledger()? {
            Some(ledger) => {
                info!(
                    "Application: restored PDT ledger ({} day trade(s) in window)",
                    ledger.day_trade_count()
                );
                ledger
            }
            None => Default::default(),
        };

        let funnel = Arc::new(OpportunityFunnel::new(
            gateway.clone(),
            oracle.clone(),
            FunnelConfig {
                sector_watchlist: config.sector_watchlist.clone(),
                ..FunnelConfig::default()
            },
        ));
        let evaluator = StrategyEvaluator::new(EvaluatorConfig {
            min_confidence: config.ai_confidence_threshold,
            min_reward_risk: config.risk.min_reward_risk,
            ..EvaluatorConfig::default()
        });
        let risk = RiskEngine::new(config.risk.clone());
        let lifecycle = OrderLifecycle::new(gateway.clone());
        let reconciler = ProtectionReconciler::new(gateway.clone(), config.emergency_stop_pct);
        let emergency = Arc::new(EmergencyStop::new(
            gateway.clone(),
            EmergencyConfig::default(),
        ));
        let guard = OvernightGuard::new(GuardConfig {
            max_overnight_days: config.max_overnight_days,
            max_overnight_positions: config.max_overnight_positions,
        });
        let intelligence = MarketIntelligence::new(gateway.clone(), oracle);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = Scheduler::new(
            gateway,
            funnel,
            evaluator,
            risk,
            lifecycle,
            reconciler,
            emergency,
            guard,
            intelligence,
            ledger,
            store,
            config,
            shutdown_rx,
        );

        Ok(Application {
            scheduler,
            shutdown_tx,
        })
    }

    /// Handle for requesting a graceful shutdown from outside the loop.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub async fn run(self) -> Result<()> {
        self.scheduler.run().await
    }
}

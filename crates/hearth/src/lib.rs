// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hearth: a self-hosted replacement for the cloud a smart thermostat
//! expects to talk to. Devices speak their vendor transport against one
//! port; dashboards and automations use the control API on another; both
//! command the same versioned object store.

pub mod availability;
pub mod bus;
pub mod config;
pub mod error;
pub mod integrations;
pub mod service;
pub mod store;
pub mod subs;
pub mod transport;
pub mod types;
pub mod weather;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::availability::AvailabilityWatchdog;
use crate::bus::ChangeBus;
use crate::config::HearthConfig;
use crate::integrations::mqtt::MqttIntegration;
use crate::integrations::IntegrationManager;
use crate::service::StateService;
use crate::store::Store;
use crate::subs::SubscriptionManager;
use crate::transport::{control_router, device_router};
use crate::weather::WeatherService;

/// Shared server state threaded into every handler.
pub struct AppState {
    pub config: HearthConfig,
    pub store: Arc<Store>,
    pub bus: ChangeBus,
    pub subs: Arc<SubscriptionManager>,
    pub service: Arc<StateService>,
    pub availability: Arc<AvailabilityWatchdog>,
    pub integrations: Arc<IntegrationManager>,
    pub weather: WeatherService,
    pub shutdown: CancellationToken,
}

/// Open the store and wire every component together. Background tasks are
/// started separately via [`spawn_background`].
pub async fn build_state(
    config: HearthConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<Arc<AppState>> {
    let store = Arc::new(Store::open(&config.sqlite3_db_path).await?);
    let bus = ChangeBus::new();
    let subs = Arc::new(SubscriptionManager::new(config.max_subscriptions_per_device));
    let service = Arc::new(StateService::new(Arc::clone(&store), bus.clone()));

    let mut integrations = IntegrationManager::new(shutdown.clone());
    if config.mqtt_host.is_some() {
        integrations.register(MqttIntegration::new(config.clone(), Arc::clone(&service)));
    }
    let integrations = Arc::new(integrations);

    let availability = Arc::new(AvailabilityWatchdog::new(
        &config,
        Arc::clone(&subs),
        Arc::clone(&integrations),
    ));
    // Devices already on file start out available; the sweep loop demotes
    // the silent ones.
    availability.track_known(&store.list_serials().await?);

    let weather = WeatherService::new(
        config.weather_upstream.clone(),
        config.weather_cache_ttl_ms,
        Arc::clone(&store),
    );

    Ok(Arc::new(AppState {
        store,
        bus,
        subs,
        service,
        availability,
        integrations,
        weather,
        shutdown,
        config,
    }))
}

/// Start the change-bus consumers and the watchdog sweep.
pub fn spawn_background(state: &Arc<AppState>) {
    subs::spawn_notifier(
        Arc::clone(&state.subs),
        state.bus.subscribe(),
        state.shutdown.clone(),
    );
    if !state.integrations.is_empty() {
        state.integrations.spawn_router(state.bus.subscribe());
    }
    state.availability.spawn(state.shutdown.clone());
}

/// Run both servers until shutdown.
pub async fn run(config: HearthConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let state = build_state(config, shutdown.clone()).await?;
    spawn_background(&state);

    if let Some(ref cert_dir) = state.config.cert_dir {
        tracing::info!(
            cert_dir = %cert_dir.display(),
            "TLS termination is external; certificates are not loaded here"
        );
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let device_addr = format!("{}:{}", state.config.proxy_host, state.config.proxy_port);
    let control_addr = format!("{}:{}", state.config.control_host, state.config.control_port);

    let device_listener = TcpListener::bind(&device_addr).await?;
    let control_listener = TcpListener::bind(&control_addr).await?;
    tracing::info!(device = %device_addr, control = %control_addr, "hearth listening");

    let device_server = axum::serve(device_listener, device_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let control_server = axum::serve(control_listener, control_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::try_join!(device_server, control_server)?;

    state.store.close().await;
    Ok(())
}

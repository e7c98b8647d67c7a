use crate::broker::local::LocalBroker;
use crate::broker::Broker;
use crate::core::config::Config;
use crate::modules::amqp_server::AmqpServerModule;
use crate::modules::logger::LoggerModule;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Assembled gateway: broker, sink modules, and the AMQP ingress worker.
///
/// Construction wires everything; [`Gateway::shutdown`] tears it down in
/// reverse order (ingress first, so no envelope is published into a broker
/// whose sinks are gone).
pub struct Gateway {
    broker: Arc<LocalBroker>,
    amqp_server: AmqpServerModule,
}

impl Gateway {
    pub fn start(config: Config) -> Result<Self> {
        config.validate()?;
        let broker = Arc::new(LocalBroker::new());
        broker.attach_sink(Arc::new(LoggerModule::new()));
        let amqp_server = AmqpServerModule::spawn(
            broker.clone() as Arc<dyn Broker>,
            config.listener.bind,
            config.mappings.clone(),
        )
        .with_context(|| format!("starting amqp listener on {}", config.listener.bind))?;
        info!(addr = %amqp_server.local_addr(), mappings = config.mappings.len(), "gateway started");
        Ok(Self {
            broker,
            amqp_server,
        })
    }

    /// Address the ingress listener actually bound to. Differs from the
    /// configured bind when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.amqp_server.local_addr()
    }

    pub fn broker(&self) -> Arc<LocalBroker> {
        self.broker.clone()
    }

    pub fn shutdown(mut self) {
        self.amqp_server.shutdown();
        info!("gateway stopped");
    }
}

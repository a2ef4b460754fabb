use anyhow::{bail, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::endpoint::BrokerAddress;
use super::{LabelPayload, Publisher};
use crate::config::MqttSettings;
use crate::telemetry::ComponentLogger;

const REQUEST_CAPACITY: usize = 10;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
/// How long queued requests may keep flowing after shutdown starts.
const FLUSH_GRACE: Duration = Duration::from_millis(500);
const JOIN_TIMEOUT: Duration = Duration::from_secs(3);
const JOIN_POLL: Duration = Duration::from_millis(10);

/// QoS 1 publisher over rumqttc.
///
/// `publish` only enqueues the request (`try_publish`); a connection thread
/// drives the event loop and reconnects after errors.
pub struct MqttPublisher {
    client: Client,
    shutting_down: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
    logger: ComponentLogger,
}

impl MqttPublisher {
    pub fn connect(settings: &MqttSettings, logger: ComponentLogger) -> Result<Self> {
        let broker = BrokerAddress::parse(&settings.broker, settings.use_tls)?;

        let mut options = MqttOptions::new(&settings.client_id, &broker.host, broker.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(broker.transport(settings.ca_path.as_deref())?);

        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let shutting_down = Arc::new(AtomicBool::new(false));
        let connection_handle =
            spawn_connection_thread(connection, shutting_down.clone(), logger.clone())?;

        logger.info(format!(
            "publishing to {} (auth: {})",
            broker,
            settings.username.is_some()
        ));
        Ok(Self {
            client,
            shutting_down,
            connection_handle: Some(connection_handle),
            logger,
        })
    }
}

/// Drive the event loop until shutdown.
///
/// Once `shutting_down` is set the loop exits on the next connection error,
/// or on the first event after `FLUSH_GRACE`.
fn spawn_connection_thread(
    mut connection: Connection,
    shutting_down: Arc<AtomicBool>,
    logger: ComponentLogger,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mqtt-connection".to_string())
        .spawn(move || {
            let mut flush_deadline: Option<Instant> = None;
            for event in connection.iter() {
                let stopping = shutting_down.load(Ordering::Acquire);
                if stopping {
                    let deadline =
                        *flush_deadline.get_or_insert_with(|| Instant::now() + FLUSH_GRACE);
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                if let Err(err) = event {
                    if stopping {
                        break;
                    }
                    logger.warn(format!("MQTT connection error: {}", err));
                    std::thread::sleep(RECONNECT_BACKOFF);
                }
            }
        })
        .context("spawn MQTT connection thread")
}

impl Publisher for MqttPublisher {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn publish(&mut self, topic: &str, payload: &LabelPayload) -> Result<()> {
        let body = serde_json::to_vec(payload).context("serialize label payload")?;
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, body)
            .with_context(|| format!("queue MQTT publish to {}", topic))?;
        Ok(())
    }

    /// Queue a disconnect and wait up to `JOIN_TIMEOUT` for the connection
    /// thread. A full request queue only delays the exit until the grace
    /// period runs out.
    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.connection_handle.take() else {
            return Ok(());
        };
        self.shutting_down.store(true, Ordering::Release);
        if let Err(err) = self.client.try_disconnect() {
            self.logger
                .warn(format!("MQTT disconnect not queued: {}", err));
        }

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                // Detached; it exits with the process or on its next event.
                bail!("MQTT connection thread did not stop within {:?}", JOIN_TIMEOUT);
            }
            std::thread::sleep(JOIN_POLL);
        }
        if handle.join().is_err() {
            self.logger.error("MQTT connection thread panicked");
        }
        Ok(())
    }
}

//! HTTP webhook delivery.
//!
//! Registrations are loaded once at startup. [`WebhookDispatcher::notify`]
//! never waits on the network: matching jobs go onto a bounded queue that a
//! fixed pool of workers drains. A full queue drops the job.

use chime_core::{WebhookEvent, WebhookNotifier, WebhookRegistration};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::WebhookConfig;
use crate::metrics;

/// One POST to one registration.
#[derive(Debug)]
struct WebhookJob {
    registration: Arc<WebhookRegistration>,
    event: Arc<WebhookEvent>,
}

/// [`WebhookNotifier`] that POSTs events to registered URLs.
pub struct WebhookDispatcher {
    registrations: HashMap<String, Vec<Arc<WebhookRegistration>>>,
    queue: mpsc::Sender<WebhookJob>,
    workers: Vec<JoinHandle<()>>,
}

impl WebhookDispatcher {
    /// Build the HTTP client and spawn the worker pool.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn spawn(
        registrations: Vec<WebhookRegistration>,
        config: &WebhookConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        // Without a worker the receiver is dropped and every job would fail.
        let worker_count = config.workers.max(1);
        let workers = (0..worker_count)
            .map(|worker| tokio::spawn(worker_loop(worker, client.clone(), Arc::clone(&rx))))
            .collect();

        let mut by_app: HashMap<String, Vec<Arc<WebhookRegistration>>> = HashMap::new();
        for registration in registrations {
            by_app
                .entry(registration.app_id.clone())
                .or_default()
                .push(Arc::new(registration));
        }
        debug!(apps = by_app.len(), workers = worker_count, "Webhook dispatcher started");

        Ok(Self {
            registrations: by_app,
            queue,
            workers,
        })
    }

    /// Number of registrations across all applications.
    #[must_use]
    pub fn registration_count(&self) -> usize {
        self.registrations.values().map(Vec::len).sum()
    }

    /// Queue one job per matching registration. Returns how many were queued.
    pub fn enqueue(&self, event: WebhookEvent) -> usize {
        let Some(registrations) = self.registrations.get(&event.app_id) else {
            return 0;
        };

        let event = Arc::new(event);
        let mut queued = 0;
        for registration in registrations
            .iter()
            .filter(|r| r.matches(&event.app_id, &event.event))
        {
            let job = WebhookJob {
                registration: Arc::clone(registration),
                event: Arc::clone(&event),
            };
            match self.queue.try_send(job) {
                Ok(()) => {
                    queued += 1;
                    metrics::record_webhook("queued");
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        app_id = %event.app_id,
                        event = %event.event,
                        url = %registration.url,
                        "Webhook queue full, dropping job"
                    );
                    metrics::record_webhook("dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(
                        app_id = %event.app_id,
                        event = %event.event,
                        url = %registration.url,
                        "Webhook workers stopped, dropping job"
                    );
                    metrics::record_webhook("dropped");
                }
            }
        }
        queued
    }
}

impl WebhookNotifier for WebhookDispatcher {
    fn notify(&self, event: WebhookEvent) {
        self.enqueue(event);
    }
}

impl Drop for WebhookDispatcher {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop(worker: usize, client: Client, rx: Arc<Mutex<mpsc::Receiver<WebhookJob>>>) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            debug!(worker, "Webhook worker stopping");
            return;
        };
        deliver(&client, &job).await;
    }
}

async fn deliver(client: &Client, job: &WebhookJob) {
    let registration = &job.registration;
    let mut request = client.post(&registration.url).json(job.event.as_ref());
    if !registration.token.is_empty() {
        request = request.bearer_auth(&registration.token);
    }

    match request.send().await.and_then(reqwest::Response::error_for_status) {
        Ok(response) => {
            debug!(url = %registration.url, status = %response.status(), "Webhook delivered");
            metrics::record_webhook("delivered");
        }
        Err(e) => {
            warn!(
                app_id = %registration.app_id,
                url = %registration.url,
                error = %e,
                "Webhook delivery failed"
            );
            metrics::record_webhook("failed");
        }
    }
}

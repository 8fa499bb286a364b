//! Effect driver
//!
//! Runs a [`Controller`] to quiescence: network effects are executed with
//! `reqwest`, timers with `tokio::time`, and everything the popup would
//! display is recorded in a [`Report`].

use std::collections::VecDeque;
use std::time::Duration;

use hz_core::controller::{Controller, Effect, Event, TimerId};
use hz_core::fetch::{AssetRequest, FetchRequest, FetchResponse, LoadedAsset, Method, TransportError};
use hz_core::Size;
use log::{debug, warn};
use serde::Serialize;
use tokio::time::Instant;

/// Effects executed before the driver gives up on a looping session.
const MAX_STEPS: usize = 1_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Shown {
    pub url: String,
    pub caption: Option<String>,
    pub gallery_index: Option<usize>,
    pub gallery_count: Option<usize>,
    pub gallery_title: Option<String>,
    pub tabfix: bool,
    pub scale: Option<f64>,
    pub rect: Option<[f64; 4]>,
}

/// What the session showed and reported.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub phase: String,
    pub shown: Option<Shown>,
    pub messages: Vec<String>,
    pub console: Vec<String>,
    pub requests: Vec<String>,
    pub preloads: Vec<String>,
    pub css: Vec<String>,
    pub frames: Vec<String>,
}

impl Report {
    /// Fold one display effect into the report.
    pub fn record(&mut self, effect: &Effect) {
        match effect {
            Effect::Show {
                url,
                caption,
                gallery,
                tabfix,
            } => {
                self.shown = Some(Shown {
                    url: url.clone(),
                    caption: caption.clone(),
                    gallery_index: gallery.as_ref().map(|g| g.index),
                    gallery_count: gallery.as_ref().map(|g| g.count),
                    gallery_title: gallery.as_ref().and_then(|g| g.title.clone()),
                    tabfix: *tabfix,
                    scale: None,
                    rect: None,
                });
            }
            Effect::Place { rect, scale, .. } => {
                if let Some(shown) = &mut self.shown {
                    shown.scale = Some(*scale);
                    shown.rect = Some([rect.x, rect.y, rect.w, rect.h]);
                }
            }
            Effect::Hide => self.shown = None,
            Effect::Preload { url } => self.preloads.push(url.clone()),
            Effect::Message(message) => self.messages.push(message.clone()),
            Effect::Console { rule, url, detail } => self.console.push(format!(
                "{} [{}]: {}",
                url,
                rule.as_deref().unwrap_or("-"),
                detail
            )),
            Effect::InjectCss(css) => self.css.push(css.clone()),
            Effect::PostToParent(message) | Effect::ReplyToFrame(message) => self.frames.push(message.to_string()),
            Effect::FetchDocument { request, .. } => self.requests.push(format!("document {}", request.url)),
            Effect::LoadAsset { request, .. } => self.requests.push(format!("asset {}", request.url)),
            Effect::Status(status) => debug!("status {:?}", status),
            Effect::StartTimer { .. } | Effect::CancelTimer(_) | Effect::Abort(_) | Effect::Yield => {}
        }
    }
}

pub struct Driver<'c, 'r> {
    client: reqwest::Client,
    controller: &'c mut Controller<'r>,
    asset_timeout: Duration,
    timers: Vec<(TimerId, Instant)>,
    report: Report,
}

impl<'c, 'r> Driver<'c, 'r> {
    pub fn new(client: reqwest::Client, controller: &'c mut Controller<'r>, asset_timeout: Duration) -> Self {
        Self {
            client,
            controller,
            asset_timeout,
            timers: Vec::new(),
            report: Report::default(),
        }
    }

    /// Execute `initial` and everything it leads to.
    pub async fn run(mut self, initial: Vec<Effect>) -> Report {
        let mut queue: VecDeque<Effect> = initial.into();
        let mut steps = 0usize;

        loop {
            while let Some(effect) = queue.pop_front() {
                steps += 1;
                if steps > MAX_STEPS {
                    warn!("session did not settle after {} effects", MAX_STEPS);
                    queue.clear();
                    self.timers.clear();
                    break;
                }
                for event in self.execute(effect).await {
                    queue.extend(self.controller.handle(event));
                }
            }

            let next = self.timers.iter().min_by_key(|(_, at)| *at).copied();
            match next {
                Some((id, at)) => {
                    self.timers.retain(|(t, _)| *t != id);
                    tokio::time::sleep_until(at).await;
                    queue.extend(self.controller.handle(Event::TimerFired(id)));
                }
                None => break,
            }
        }

        self.report.phase = format!("{:?}", self.controller.phase());
        self.report
    }

    async fn execute(&mut self, effect: Effect) -> Vec<Event> {
        self.report.record(&effect);
        match effect {
            Effect::StartTimer { id, after } => {
                self.timers.push((id, Instant::now() + after));
                Vec::new()
            }
            Effect::CancelTimer(id) => {
                self.timers.retain(|(t, _)| *t != id);
                Vec::new()
            }
            Effect::FetchDocument { id, request } => {
                let result = fetch_document(&self.client, &request).await;
                vec![Event::DocumentLoaded { request: id, result }]
            }
            Effect::LoadAsset { id, request } => {
                let (progress, result) = load_asset(&self.client, &request, self.asset_timeout).await;
                let mut events = Vec::with_capacity(2);
                if let Some((loaded, total)) = progress {
                    events.push(Event::Progress {
                        request: id,
                        loaded,
                        total,
                    });
                }
                events.push(Event::AssetLoaded { request: id, result });
                events
            }
            _ => Vec::new(),
        }
    }
}

fn transport(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout { url: url.to_string() }
    } else {
        TransportError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

async fn fetch_document(client: &reqwest::Client, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
    debug!("{:?} {}", request.method, request.url);
    let mut builder = match request.method {
        Method::Get => client.get(&request.url),
        Method::Post => client
            .post(&request.url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(request.body.clone().unwrap_or_default()),
    };
    builder = builder.timeout(request.timeout);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = builder.send().await.map_err(|e| transport(&request.url, e))?;
    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    let text = response.text().await.map_err(|e| transport(&request.url, e))?;
    Ok(FetchResponse { text, final_url, status })
}

type Progress = Option<(u64, Option<u64>)>;

async fn load_asset(
    client: &reqwest::Client,
    request: &AssetRequest,
    timeout: Duration,
) -> (Progress, Result<LoadedAsset, TransportError>) {
    debug!("asset {} (via fetch: {})", request.url, request.via_fetch);
    let mut builder = client.get(&request.url).timeout(timeout);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => return (None, Err(transport(&request.url, e))),
    };
    if !response.status().is_success() {
        let status = response.status().as_u16();
        return (None, Err(TransportError::Status { url: request.url.clone(), status }));
    }

    let total = response.content_length();
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return (None, Err(transport(&request.url, e))),
    };
    let progress = Some((bytes.len() as u64, total));

    let result = match asset_dimensions(&bytes) {
        Some(natural) => Ok(LoadedAsset {
            natural,
            byte_len: Some(bytes.len() as u64),
        }),
        None => Err(TransportError::Decode { url: request.url.clone() }),
    };
    (progress, result)
}

/// Natural size of an encoded image.
pub fn asset_dimensions(bytes: &[u8]) -> Option<Size> {
    let image = image::load_from_memory(bytes).ok()?;
    Some(Size::new(image.width() as f64, image.height() as f64))
}

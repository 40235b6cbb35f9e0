//! Outbound HTTP adapters: Open Graph link previews and Open-Meteo weather.

use std::{cell::RefCell, rc::Rc};

use async_trait::async_trait;
use lol_html::{RewriteStrSettings, element, rewrite_str, text};
use metrics::counter;
use reqwest::{Client, header, redirect};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{
    application::{
        error::FetchError,
        link_preview::{LinkPreview, PreviewFetcher, parse_web_url},
        weather::{WeatherProvider, WeatherReport},
    },
    config::{LinkPreviewSettings, WeatherSettings},
};

use super::error::InfraError;

const METRIC_PREVIEW_FETCH: &str = "crunevo_preview_fetch_total";
const MAX_REDIRECTS: usize = 5;
const MAX_FIELD_CHARS: usize = 500;

/// Fetches HTML pages and extracts Open Graph metadata.
#[derive(Clone)]
pub struct HttpPreviewFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpPreviewFetcher {
    pub fn new(settings: &LinkPreviewSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            max_body_bytes: settings.max_body_bytes.get(),
        })
    }

    async fn fetch_html(&self, url: &Url) -> Result<(Url, String), FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|err| FetchError::request(url.as_str(), err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        if parse_web_url(final_url.as_str()).is_none() {
            return Err(FetchError::Unsupported {
                url: url.to_string(),
                message: format!("redirected to non-web URL `{final_url}`"),
            });
        }

        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default().to_ascii_lowercase();
            if !(content_type.contains("text/html") || content_type.contains("xhtml")) {
                return Err(FetchError::Unsupported {
                    url: url.to_string(),
                    message: format!("content type `{content_type}`"),
                });
            }
        }

        // Metadata lives in <head>; anything past the cap is dropped.
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| FetchError::request(url.as_str(), err))?
        {
            let room = self.max_body_bytes.saturating_sub(body.len());
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= self.max_body_bytes {
                debug!(url = %url, limit = self.max_body_bytes, "Preview body truncated");
                break;
            }
        }

        Ok((final_url, String::from_utf8_lossy(&body).into_owned()))
    }
}

#[async_trait]
impl PreviewFetcher for HttpPreviewFetcher {
    async fn fetch(&self, url: &Url) -> Result<LinkPreview, FetchError> {
        let outcome = match self.fetch_html(url).await {
            Ok((final_url, html)) => parse_preview(&html, &final_url),
            Err(err) => Err(err),
        };
        let label = match &outcome {
            Ok(preview) if preview.is_empty() => "empty",
            Ok(_) => "ok",
            Err(FetchError::Status { .. }) => "status",
            Err(FetchError::Unsupported { .. }) => "unsupported",
            Err(_) => "error",
        };
        counter!(METRIC_PREVIEW_FETCH, "outcome" => label).increment(1);
        outcome.map(|mut preview| {
            preview.url = url.to_string();
            preview
        })
    }
}

#[derive(Default, Clone)]
struct PreviewState {
    og_title: Option<String>,
    og_description: Option<String>,
    og_image: Option<String>,
    og_site_name: Option<String>,
    meta_description: Option<String>,
    title: String,
}

/// Extracts preview fields from `html`, resolving relative image URLs against `base`.
pub fn parse_preview(html: &str, base: &Url) -> Result<LinkPreview, FetchError> {
    let state = Rc::new(RefCell::new(PreviewState::default()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("meta[content]", {
                    let state = Rc::clone(&state);
                    move |el| {
                        let key = el
                            .get_attribute("property")
                            .or_else(|| el.get_attribute("name"))
                            .map(|key| key.trim().to_ascii_lowercase());
                        let (Some(key), Some(content)) = (key, el.get_attribute("content")) else {
                            return Ok(());
                        };
                        let mut state = state.borrow_mut();
                        let slot = match key.as_str() {
                            "og:title" => &mut state.og_title,
                            "og:description" => &mut state.og_description,
                            "og:image" | "og:image:url" => &mut state.og_image,
                            "og:site_name" => &mut state.og_site_name,
                            "description" => &mut state.meta_description,
                            _ => return Ok(()),
                        };
                        if slot.is_none() {
                            *slot = clean(&content);
                        }
                        Ok(())
                    }
                }),
                text!("title", {
                    let state = Rc::clone(&state);
                    move |t| {
                        state.borrow_mut().title.push_str(t.as_str());
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| FetchError::parse(base.as_str(), err))?;

    let state = Rc::try_unwrap(state)
        .map(|cell| cell.into_inner())
        .unwrap_or_else(|rc| rc.borrow().clone());

    let image = state
        .og_image
        .and_then(|image| base.join(&image).ok())
        .filter(|image| matches!(image.scheme(), "http" | "https"))
        .map(String::from);

    Ok(LinkPreview {
        url: base.to_string(),
        title: state.og_title.or_else(|| clean(&state.title)),
        description: state.og_description.or(state.meta_description),
        image,
        site_name: state.og_site_name,
    })
}

/// Decodes common entities, collapses whitespace and caps the length.
fn clean(raw: &str) -> Option<String> {
    let decoded = decode_entities(raw);
    let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    Some(collapsed.chars().take(MAX_FIELD_CHARS).collect())
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Current conditions from the Open-Meteo forecast API.
#[derive(Clone)]
pub struct OpenMeteoProvider {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct OpenMeteoResponse {
    latitude: f64,
    longitude: f64,
    current: OpenMeteoCurrent,
}

#[derive(Deserialize)]
struct OpenMeteoCurrent {
    temperature_2m: f64,
    wind_speed_10m: f64,
    weather_code: i32,
}

impl OpenMeteoProvider {
    pub fn new(settings: &WeatherSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http_client(err.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
        })
    }

    fn request_url(&self, latitude: f64, longitude: f64) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("latitude", &format!("{latitude:.2}"))
            .append_pair("longitude", &format!("{longitude:.2}"))
            .append_pair("current", "temperature_2m,wind_speed_10m,weather_code");
        url
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn current(&self, latitude: f64, longitude: f64) -> Result<WeatherReport, FetchError> {
        let url = self.request_url(latitude, longitude);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| FetchError::request(url.as_str(), err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|err| FetchError::parse(url.as_str(), err))?;

        Ok(WeatherReport {
            latitude: body.latitude,
            longitude: body.longitude,
            temperature_c: body.current.temperature_2m,
            wind_speed_kmh: body.current.wind_speed_10m,
            weather_code: body.current.weather_code,
        })
    }
}

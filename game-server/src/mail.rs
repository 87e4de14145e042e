use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tera::{Context, Tera};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MailgunConfig;

const TEMPLATE_PARTS: [&str; 3] = ["subject", "text", "html"];

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("failed to load template '{name}': {reason}")]
    Template { name: String, reason: String },
    #[error("failed to render template '{name}': {source}")]
    Render {
        name: String,
        #[source]
        source: tera::Error,
    },
    #[error("could not send message to {to}: {reason}")]
    Transport { to: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
    /// Left out of the message when blank.
    pub html: String,
}

/// Delivers rendered mail and returns the provider's message id.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError>;
}

#[derive(Deserialize)]
struct MailgunResponse {
    id: String,
}

pub struct MailgunSender {
    client: Client,
    base_url: String,
    domain: String,
    api_key: String,
}

impl MailgunSender {
    pub fn new(config: &MailgunConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: "https://api.mailgun.net/v3".to_string(),
            domain: config.domain.clone(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl MailSender for MailgunSender {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError> {
        let to = mail.to.join(", ");
        let transport = |reason: String| MailError::Transport {
            to: to.clone(),
            reason,
        };

        let mut params = vec![
            ("from", mail.from.as_str()),
            ("subject", mail.subject.as_str()),
            ("text", mail.text.as_str()),
        ];
        params.extend(mail.to.iter().map(|addr| ("to", addr.as_str())));
        if !mail.html.trim().is_empty() {
            params.push(("html", mail.html.as_str()));
        }

        let response = self
            .client
            .post(format!("{}/{}/messages", self.base_url, self.domain))
            .basic_auth("api", Some(&self.api_key))
            .form(&params)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "(unreadable)".into());
            return Err(transport(format!("{}: {}", status, text)));
        }

        let body: MailgunResponse = response
            .json()
            .await
            .map_err(|e| transport(format!("unexpected response: {}", e)))?;

        info!("Mailgun accepted message {} to {}", body.id, to);
        Ok(body.id)
    }
}

/// Logs mail instead of delivering it. Used when Mailgun is not configured.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl MailSender for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, MailError> {
        let id = format!("<{}@localhost>", Uuid::new_v4());
        info!(
            "Mail {} from {} to {:?}: {}\n{}",
            id, mail.from, mail.to, mail.subject, mail.text
        );
        Ok(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedMail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Parsed templates, loaded from `<dir>/<name>/{subject,text,html}.tera` on
/// first use and kept for the life of the cache.
pub struct TemplateCache {
    dir: PathBuf,
    templates: RwLock<HashMap<String, Arc<Tera>>>,
}

impl TemplateCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            templates: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn is_cached(&self, name: &str) -> bool {
        self.templates.read().await.contains_key(name)
    }

    /// Renders every part of template `name`. Missing parts render empty.
    pub async fn render(&self, name: &str, context: &Context) -> Result<RenderedMail, MailError> {
        let tera = self.get_or_load(name).await?;

        let render = |part: &str| -> Result<String, MailError> {
            if !tera.get_template_names().any(|n| n == part) {
                return Ok(String::new());
            }
            tera.render(part, context)
                .map(|s| s.trim().to_string())
                .map_err(|source| MailError::Render {
                    name: name.to_string(),
                    source,
                })
        };

        Ok(RenderedMail {
            subject: render("subject")?,
            text: render("text")?,
            html: render("html")?,
        })
    }

    async fn get_or_load(&self, name: &str) -> Result<Arc<Tera>, MailError> {
        {
            let cache = self.templates.read().await;
            if let Some(tera) = cache.get(name) {
                return Ok(tera.clone());
            }
        }

        let tera = Arc::new(self.load(name).await?);
        let mut cache = self.templates.write().await;
        let entry = cache.entry(name.to_string()).or_insert(tera);
        Ok(entry.clone())
    }

    async fn load(&self, name: &str) -> Result<Tera, MailError> {
        let template_err = |reason: String| MailError::Template {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() || name.contains(['/', '\\', '.']) {
            return Err(template_err("invalid template name".to_string()));
        }

        let mut tera = Tera::default();
        tera.autoescape_on(vec!["html"]);

        for part in TEMPLATE_PARTS {
            let path = self.dir.join(name).join(format!("{}.tera", part));
            match tokio::fs::read_to_string(&path).await {
                Ok(source) => tera
                    .add_raw_template(part, &source)
                    .map_err(|e| template_err(format!("{}: {}", path.display(), e)))?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Template part {} missing, rendering empty", path.display());
                }
                Err(e) => return Err(template_err(format!("{}: {}", path.display(), e))),
            }
        }

        debug!("Loaded mail template '{}'", name);
        Ok(tera)
    }
}

/// Renders named templates with the site defaults and hands them to a
/// [`MailSender`].
pub struct Mailer {
    sender: Arc<dyn MailSender>,
    templates: Arc<TemplateCache>,
    from: String,
    root_url: String,
    site_name: String,
}

impl Mailer {
    pub fn new(
        sender: Arc<dyn MailSender>,
        templates: Arc<TemplateCache>,
        from: impl Into<String>,
        root_url: impl Into<String>,
        site_name: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            templates,
            from: from.into(),
            root_url: root_url.into(),
            site_name: site_name.into(),
        }
    }

    pub async fn send_template(
        &self,
        name: &str,
        to: &[String],
        params: &HashMap<String, String>,
    ) -> Result<String, MailError> {
        let mut context = Context::new();
        for (key, value) in params {
            context.insert(key.as_str(), value);
        }
        context.insert("ROOT", &self.root_url);
        context.insert("SiteName", &self.site_name);

        let rendered = self.templates.render(name, &context).await?;
        let mail = OutgoingMail {
            from: self.from.clone(),
            to: to.to_vec(),
            subject: rendered.subject,
            text: rendered.text,
            html: rendered.html,
        };

        self.sender.send(&mail).await
    }
}

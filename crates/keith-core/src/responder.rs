use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use keith_schema::{Language, Resource, TaskPayload};
use keith_store::ResourceStore;
use keith_tasks::TaskHandler;

use crate::persona::PersonaRegistry;
use crate::retrieval::Retriever;

const RECENT_IN_REPORT: usize = 15;
const CATALOG_REPORT_COMMANDS: [&str; 4] = [
    "system test",
    "systems test",
    "check resource catalog",
    "test system",
];

/// Single-turn responder behind the task worker.
pub struct KeithResponder {
    store: Arc<dyn ResourceStore>,
    retriever: Retriever,
    personas: Arc<PersonaRegistry>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    CatalogReport,
    ShowSystemPrompt,
    VerifyOrg(&'a str),
    Ask(&'a str),
}

fn parse_command(message: &str) -> Command<'_> {
    let trimmed = message.trim();
    let lower = trimmed.to_lowercase();
    if CATALOG_REPORT_COMMANDS.contains(&lower.as_str()) {
        return Command::CatalogReport;
    }
    if lower == "show system prompt" {
        return Command::ShowSystemPrompt;
    }
    const VERIFY: &str = "verify org";
    if lower.starts_with(VERIFY) && trimmed.is_char_boundary(VERIFY.len()) {
        let rest = &trimmed[VERIFY.len()..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Command::VerifyOrg(rest.trim());
        }
    }
    Command::Ask(trimmed)
}

impl KeithResponder {
    pub fn new(store: Arc<dyn ResourceStore>, personas: Arc<PersonaRegistry>) -> Self {
        Self {
            retriever: Retriever::new(Arc::clone(&store)),
            store,
            personas,
        }
    }

    async fn catalog_report(&self) -> Result<String> {
        let total = self.store.count().await?;
        let categories = self.store.categories().await?;
        let recent = self.store.recent(RECENT_IN_REPORT).await?;

        let mut out = String::from("Resource catalog status\n");
        let _ = writeln!(out, "Total resources: {total}");
        let _ = writeln!(
            out,
            "Categories ({}): {}",
            categories.len(),
            if categories.is_empty() {
                "none".to_string()
            } else {
                categories.join(", ")
            }
        );
        if !recent.is_empty() {
            let _ = writeln!(out, "Most recently added:");
            for r in &recent {
                let _ = writeln!(out, "- {} ({})", r.name, r.category_or_default());
            }
        }
        Ok(out.trim_end().to_string())
    }

    async fn verify_org(&self, name: &str) -> Result<String> {
        if name.is_empty() {
            return Ok("Usage: verify org <organization name>".to_string());
        }
        Ok(match self.store.find_by_name(name).await? {
            Some(resource) => render_details(&resource),
            None => format!("No organization named \"{name}\" is in the resource catalog."),
        })
    }

    async fn recommend(&self, message: &str) -> String {
        let phrases = &self.personas.get(Language::En).phrases;
        match self.retriever.find_matches(message).await.first() {
            Some(top) => format!(
                "I'd recommend {}. They help with {}. {}",
                top.name,
                top.category_or_default(),
                top.description
            ),
            None => phrases.fallback_offer.to_string(),
        }
    }
}

fn render_details(resource: &Resource) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", resource.name);
    let _ = writeln!(out, "Category: {}", resource.category_or_default());
    if !resource.secondary_categories.is_empty() {
        let _ = writeln!(
            out,
            "Secondary categories: {}",
            resource.secondary_categories.join(", ")
        );
    }
    let _ = writeln!(out, "Service area: {}", resource.service_area());
    if let Some(website) = &resource.contact_info.website {
        let _ = writeln!(out, "Website: {website}");
    }
    let _ = writeln!(out, "Description: {}", resource.description);
    if !resource.programs.is_empty() {
        let _ = writeln!(out, "Programs:");
        for program in &resource.programs {
            match &program.description {
                Some(desc) => {
                    let _ = writeln!(out, "- {}: {desc}", program.name);
                }
                None => {
                    let _ = writeln!(out, "- {}", program.name);
                }
            }
        }
    }
    out.trim_end().to_string()
}

#[async_trait]
impl TaskHandler for KeithResponder {
    async fn handle(&self, payload: &TaskPayload) -> Result<String> {
        if payload.message.trim().is_empty() {
            bail!("No message in payload");
        }
        match parse_command(&payload.message) {
            Command::CatalogReport => self.catalog_report().await,
            Command::ShowSystemPrompt => {
                Ok(self.personas.get(Language::En).system_script.to_string())
            }
            Command::VerifyOrg(name) => self.verify_org(name).await,
            Command::Ask(message) => Ok(self.recommend(message).await),
        }
    }
}

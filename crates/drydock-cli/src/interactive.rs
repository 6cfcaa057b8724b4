//! Interactive prompts for the deploy command.
//!
//! Fills in site name and port when they were not passed on the command
//! line, validating port availability before the pipeline starts. Uses
//! dialoguer for terminal UI prompts.

use anyhow::Result;
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Input};

use drydock_core::orchestration::is_port_available;

/// Site name and port, prompted for when missing.
#[derive(Debug, Clone)]
pub struct SiteIdentity {
    pub name: String,
    pub port: u16,
}

/// Prompt for whatever part of the site identity the CLI args left open.
pub fn resolve_site_identity(name: Option<String>, port: Option<u16>) -> Result<SiteIdentity> {
    let theme = ColorfulTheme::default();

    let name = match name {
        Some(name) => name,
        None => Input::with_theme(&theme)
            .with_prompt("Site name")
            .validate_with(|input: &String| {
                if input.trim().is_empty() {
                    Err("site name cannot be empty")
                } else if input.contains(char::is_whitespace) {
                    Err("site name cannot contain whitespace")
                } else {
                    Ok(())
                }
            })
            .interact_text()?,
    };

    let port = match port {
        Some(port) => port,
        None => loop {
            let candidate: u16 = Input::with_theme(&theme)
                .with_prompt("Site port")
                .default(8100)
                .interact_text()?;
            if is_port_available(candidate) {
                break candidate;
            }
            println!(
                "{} port {candidate} appears to be in use",
                style("warning:").yellow().bold()
            );
            let proceed = Confirm::with_theme(&theme)
                .with_prompt("Use it anyway?")
                .default(false)
                .interact()?;
            if proceed {
                break candidate;
            }
        },
    };

    Ok(SiteIdentity { name, port })
}

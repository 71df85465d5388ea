//! Tera rendering engine: [`TemplateKind`] and [`Renderer`].
//!
//! | Template         | Output                                        |
//! |------------------|-----------------------------------------------|
//! | DnsmasqConf      | `<run-root>/<instance>/dnsmasq.conf`          |
//! | DnsmasqEnv       | `<run-root>/<instance>/dnsmasq.env`           |
//! | Fragment         | `<run-root>/<instance>/dnsmasq.d/*.conf`      |
//! | DdclientConf     | `<ddclient config-dir>/ddclient_<if>.conf`    |
//! | DdclientEnv      | `<ddclient run-dir>/<if>/ddclient.env`        |

use tera::Tera;

use dnsvisor_core::{DynamicInterface, DynamicLayout, ForwardingConfig, ForwardingLayout};

use crate::context::{
    to_tera_context, DdclientContext, ForwardingContext, ForwardingEnvContext, FragmentContext,
};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates: baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("dnsmasq.conf.tera", include_str!("templates/dnsmasq.conf.tera")),
    ("dnsmasq.env.tera", include_str!("templates/dnsmasq.env.tera")),
    ("fragment.conf.tera", include_str!("templates/fragment.conf.tera")),
    ("ddclient.conf.tera", include_str!("templates/ddclient.conf.tera")),
    ("ddclient.env.tera", include_str!("templates/ddclient.env.tera")),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    DnsmasqConf,
    DnsmasqEnv,
    Fragment,
    DdclientConf,
    DdclientEnv,
}

impl TemplateKind {
    pub fn all() -> &'static [TemplateKind] {
        &[
            TemplateKind::DnsmasqConf,
            TemplateKind::DnsmasqEnv,
            TemplateKind::Fragment,
            TemplateKind::DdclientConf,
            TemplateKind::DdclientEnv,
        ]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            TemplateKind::DnsmasqConf  => "dnsmasq.conf.tera",
            TemplateKind::DnsmasqEnv   => "dnsmasq.env.tera",
            TemplateKind::Fragment     => "fragment.conf.tera",
            TemplateKind::DdclientConf => "ddclient.conf.tera",
            TemplateKind::DdclientEnv  => "ddclient.env.tera",
        }
    }
}

fn normalize_line_endings(rendered: String) -> String {
    if rendered.contains('\r') {
        rendered.replace("\r\n", "\n")
    } else {
        rendered
    }
}

/// Renders every generated file from the embedded templates.
///
/// Create once with [`Renderer::new`] and share.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TPLS.iter().map(|(name, body)| (*name, *body)))?;
        Ok(Renderer { tera })
    }

    fn render<T: serde::Serialize>(&self, kind: TemplateKind, ctx: &T) -> Result<String, RenderError> {
        let tera_ctx = to_tera_context(ctx)?;
        let rendered = self.tera.render(kind.template_name(), &tera_ctx)?;
        Ok(normalize_line_endings(rendered))
    }

    pub fn forwarding_conf(
        &self,
        layout: &ForwardingLayout,
        conf: &ForwardingConfig,
    ) -> Result<String, RenderError> {
        self.render(TemplateKind::DnsmasqConf, &ForwardingContext::new(layout, conf))
    }

    pub fn forwarding_env(&self, layout: &ForwardingLayout) -> Result<String, RenderError> {
        self.render(TemplateKind::DnsmasqEnv, &ForwardingEnvContext::new(layout))
    }

    /// A `dnsmasq.d` fragment forwarding to `nameservers`, tagged with `origin`.
    pub fn fragment(&self, origin: &str, nameservers: &[String]) -> Result<String, RenderError> {
        let ctx = FragmentContext {
            origin: origin.to_string(),
            nameservers: nameservers.to_vec(),
        };
        self.render(TemplateKind::Fragment, &ctx)
    }

    pub fn ddclient_conf(
        &self,
        layout: &DynamicLayout,
        intf: &DynamicInterface,
    ) -> Result<String, RenderError> {
        self.render(TemplateKind::DdclientConf, &DdclientContext::new(layout, intf))
    }

    pub fn ddclient_env(
        &self,
        layout: &DynamicLayout,
        intf: &DynamicInterface,
    ) -> Result<String, RenderError> {
        self.render(TemplateKind::DdclientEnv, &DdclientContext::new(layout, intf))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

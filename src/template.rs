//! # Request Templates
//!
//! Requests to the Admin API are described by named `handlebars` templates:
//! one for the URL and, for mutations, one for the JSON body. A
//! [`RequestTemplate`] pairs those names with the data to substitute, and
//! [`TemplateEngine::render`] turns it into a [`RenderedRequest`] with the
//! standard headers attached.
//!
//! The engine keeps two registries because the two halves need different
//! escaping: URL substitutions are percent-encoded, body substitutions are
//! escaped as JSON string contents. Triple-stash placeholders (`{{{api_base}}}`)
//! bypass escaping and are reserved for trusted configuration values.
//!
//! Both registries run in strict mode, so a placeholder whose field is absent
//! from the data is an error rather than an empty string.

use std::fmt;

use handlebars::Handlebars;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

use crate::credential::Credential;
use crate::error::{Error, Result};

/// `/projects/{project}/instances/{instance}`, used for fetch and PATCH.
pub const INSTANCE_URL: &str = "instance_url";
/// `/projects/{project}/instances/{instance}/users?name={user}`, used for PUT.
pub const USERS_URL: &str = "users_url";
/// The OAuth2 token introspection endpoint.
pub const TOKEN_INFO_URL: &str = "token_info_url";
/// `requireSsl` patch body.
pub const SSL_BODY: &str = "ssl_body";
/// `authorizedNetworks` patch body.
pub const ACL_BODY: &str = "acl_body";
/// User password body.
pub const PASSWORD_BODY: &str = "password_body";

const BUILTIN_URLS: &[(&str, &str)] = &[
    (
        INSTANCE_URL,
        "{{{api_base}}}/projects/{{project}}/instances/{{instance}}",
    ),
    (
        USERS_URL,
        "{{{api_base}}}/projects/{{project}}/instances/{{instance}}/users?name={{user}}",
    ),
    (
        TOKEN_INFO_URL,
        "{{{token_info_url}}}?access_token={{access_token}}",
    ),
];

const BUILTIN_BODIES: &[(&str, &str)] = &[
    (
        SSL_BODY,
        r#"{
	"settings": {
		"ipConfiguration": {
			"requireSsl": "{{value}}"
		}
	}
}"#,
    ),
    (
        ACL_BODY,
        r#"{
	"settings": {
		"ipConfiguration": {
			"authorizedNetworks": [
				{{#each networks}}{{#unless @first}},{{/unless}}
				{ "value": "{{value}}", "name": "{{name}}", "kind": "{{kind}}" }
				{{/each}}
			]
		}
	}
}"#,
    ),
    (
        PASSWORD_BODY,
        r#"{
	"name": "{{user}}",
	"password": "{{password}}"
}"#,
    ),
];

/// RFC 3986 unreserved characters are left as-is; everything else is encoded.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn escape_url(s: &str) -> String {
    utf8_percent_encode(s, URL_COMPONENT).to_string()
}

fn escape_json(s: &str) -> String {
    let quoted = Value::String(s.to_owned()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Patch,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names of the templates to render plus the data to render them with.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    url: &'static str,
    url_data: Value,
    body: Option<(&'static str, Value)>,
    headers: Vec<(String, String)>,
}

impl RequestTemplate {
    pub fn new(url: &'static str, url_data: Value) -> Self {
        Self {
            url,
            url_data,
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: &'static str, body_data: Value) -> Self {
        self.body = Some((body, body_data));
        self
    }

    /// Adds a header on top of the defaults. Later values win.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A fully rendered request, ready for a [`crate::transport::Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRequest {
    pub method: Method,
    pub url: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl RenderedRequest {
    /// A request for a URL that needs no rendering, such as an operation's self link.
    pub fn new(method: Method, url: impl Into<String>, credential: Option<&Credential>) -> Self {
        let mut request = Self {
            method,
            url: url.into(),
            body: Vec::new(),
            headers: Vec::new(),
        };
        request.set_header("Content-Type", "application/json");
        if let Some(credential) = credential {
            request.set_header("Authorization", &credential.authorization());
        }
        request
    }

    /// Replaces any existing header with the same (case-insensitive) name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

pub struct TemplateEngine {
    urls: Handlebars<'static>,
    bodies: Handlebars<'static>,
}

impl TemplateEngine {
    /// Creates an engine with the built-in Admin API templates registered.
    pub fn new() -> Result<Self> {
        let mut engine = Self::empty();
        for (name, text) in BUILTIN_URLS {
            engine.register_url(name, text)?;
        }
        for (name, text) in BUILTIN_BODIES {
            engine.register_body(name, text)?;
        }
        Ok(engine)
    }

    /// Creates an engine with no templates registered.
    pub fn empty() -> Self {
        let mut urls = Handlebars::new();
        urls.set_strict_mode(true);
        urls.register_escape_fn(escape_url);

        let mut bodies = Handlebars::new();
        bodies.set_strict_mode(true);
        bodies.register_escape_fn(escape_json);

        Self { urls, bodies }
    }

    pub fn register_url(&mut self, name: &str, text: &str) -> Result<()> {
        self.urls
            .register_template_string(name, text)
            .map_err(|e| Error::TemplateRender {
                template: name.to_string(),
                message: e.to_string(),
            })
    }

    pub fn register_body(&mut self, name: &str, text: &str) -> Result<()> {
        self.bodies
            .register_template_string(name, text)
            .map_err(|e| Error::TemplateRender {
                template: name.to_string(),
                message: e.to_string(),
            })
    }

    /// Renders `template` into a request. When `credential` is given the
    /// request carries it as a bearer token.
    pub fn render(
        &self,
        method: Method,
        template: &RequestTemplate,
        credential: Option<&Credential>,
    ) -> Result<RenderedRequest> {
        let url = render_one(&self.urls, template.url, &template.url_data)?;
        let mut request = RenderedRequest::new(method, url, credential);

        if let Some((name, data)) = &template.body {
            request.body = render_one(&self.bodies, name, data)?.into_bytes();
        }
        for (name, value) in &template.headers {
            request.set_header(name, value);
        }
        Ok(request)
    }
}

fn render_one(registry: &Handlebars<'static>, name: &str, data: &Value) -> Result<String> {
    if !registry.has_template(name) {
        return Err(Error::TemplateRender {
            template: name.to_string(),
            message: "template is not registered".to_string(),
        });
    }
    registry.render(name, data).map_err(|e| Error::TemplateRender {
        template: name.to_string(),
        message: e.to_string(),
    })
}

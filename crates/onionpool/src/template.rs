//! Textual token substitution for the three rendered config templates
//! (onion-router `torrc`, HAProxy config, HTTP-filter config).
//!
//! Substitution is deliberately dumb: a fixed set of `{PLACEHOLDER}` tokens
//! is replaced by their string value, nothing else is interpreted. Any
//! `{...}`-shaped token left over after substitution is a fatal
//! [`Error::TemplateRenderError`] (fail-closed), since a stray placeholder
//! in a rendered `torrc` or `haproxy.cfg` would otherwise silently reach a
//! config parser as Tor-dialect noise instead of failing the render step.

use std::collections::BTreeMap;
use std::path::Path;

use fs_mistrust::CheckedDir;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Error;
use crate::ports::PortMap;

/// Matches any remaining `{...}` token after substitution.
static LEFTOVER_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[A-Z_]+\}").expect("built-in regex"));

/// The recognized placeholder values for one render pass.
#[derive(Debug, Clone)]
pub struct TemplateValues {
    /// `{SOCKS_PORT}`
    pub socks_port: Option<u16>,
    /// `{CONTROL_PORT}`
    pub control_port: Option<u16>,
    /// `{CONTROL_PASSWORD_HASH}`
    pub control_password_hash: Option<String>,
    /// `{DATA_DIR}`
    pub data_dir: Option<String>,
    /// `{LB_FRONT_PORT}`
    pub lb_front_port: Option<u16>,
    /// `{FILTER_LISTEN_PORT}`
    pub filter_listen_port: Option<u16>,
    /// `{DNS_PORT}`: only set for the instance designated to serve DNS
    /// redirection.
    pub dns_port: Option<u16>,
    /// `{BACKENDS}`: a multi-line `server s{i} 127.0.0.1:{port} check` block.
    pub backends: Option<String>,
}

impl TemplateValues {
    /// Build the `{BACKENDS}` block HAProxy's config expects from a
    /// `PortMap`'s per-instance SOCKS ports.
    pub fn backends_block(port_map: &PortMap) -> String {
        port_map
            .instances
            .iter()
            .enumerate()
            .map(|(i, p)| format!("    server s{i} 127.0.0.1:{} check", p.socks_port))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the key/value map this set of values expands to.
    fn as_map(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        if let Some(v) = self.socks_port {
            map.insert("SOCKS_PORT", v.to_string());
        }
        if let Some(v) = self.control_port {
            map.insert("CONTROL_PORT", v.to_string());
        }
        if let Some(v) = &self.control_password_hash {
            map.insert("CONTROL_PASSWORD_HASH", v.clone());
        }
        if let Some(v) = &self.data_dir {
            map.insert("DATA_DIR", v.clone());
        }
        if let Some(v) = self.lb_front_port {
            map.insert("LB_FRONT_PORT", v.to_string());
        }
        if let Some(v) = self.filter_listen_port {
            map.insert("FILTER_LISTEN_PORT", v.to_string());
        }
        if let Some(v) = self.dns_port {
            map.insert("DNS_PORT", v.to_string());
        }
        if let Some(v) = &self.backends {
            map.insert("BACKENDS", v.clone());
        }
        map
    }
}

/// Expand `template` by replacing every `{KEY}` present in `values` with its
/// string value, then fail if any `{UPPER_CASE}`-shaped token remains.
pub fn expand(template: &str, values: &TemplateValues) -> Result<String, Error> {
    let mut out = template.to_string();
    for (key, value) in values.as_map() {
        out = out.replace(&format!("{{{key}}}"), &value);
    }

    if let Some(m) = LEFTOVER_PLACEHOLDER.find(&out) {
        return Err(Error::TemplateRenderError(format!(
            "unrecognized placeholder {} left in rendered output",
            m.as_str()
        )));
    }

    Ok(out)
}

/// Read the template at `templates_dir/template_name`, expand it, and write
/// the result into `dest_dir/dest_name` with mode `0600`.
///
/// `dest_dir` must already be a [`CheckedDir`] so the written file inherits
/// its verified permission policy. `template_name` and `dest_name` are
/// independent so one template (e.g. `torrc.tmpl`) can be rendered once per
/// instance under distinct names (`torrc-0`, `torrc-1`, …).
pub fn render_into(
    templates_dir: &Path,
    template_name: &str,
    dest_name: &str,
    values: &TemplateValues,
    dest_dir: &CheckedDir,
) -> Result<(), Error> {
    let template_path = templates_dir.join(template_name);
    let raw = std::fs::read_to_string(&template_path)
        .map_err(|_| Error::TemplateNotFound(template_path.clone()))?;

    let rendered = expand(&raw, values)?;

    dest_dir
        .write_and_replace(dest_name, rendered.as_bytes())
        .map_err(|e| Error::TemplateRenderError(format!("writing {dest_name}: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;

    fn values() -> TemplateValues {
        TemplateValues {
            socks_port: Some(9000),
            control_port: Some(9900),
            control_password_hash: Some("16:ABCDEF".to_string()),
            data_dir: Some("/run/onionpool/i0".to_string()),
            lb_front_port: Some(16379),
            filter_listen_port: Some(8119),
            dns_port: None,
            backends: Some("    server s0 127.0.0.1:9000 check".to_string()),
        }
    }

    #[test]
    fn expands_known_placeholders() {
        let tmpl = "SocksPort {SOCKS_PORT}\nHashedControlPassword {CONTROL_PASSWORD_HASH}\n";
        let out = expand(tmpl, &values()).unwrap();
        assert_eq!(
            out,
            "SocksPort 9000\nHashedControlPassword 16:ABCDEF\n"
        );
    }

    #[test]
    fn unknown_placeholder_fails_closed() {
        let tmpl = "SocksPort {SOCKS_PORT}\nUnknown {NOT_A_REAL_TOKEN}\n";
        let err = expand(tmpl, &values()).unwrap_err();
        assert!(matches!(err, Error::TemplateRenderError(_)));
    }

    #[test]
    fn backends_block_lists_every_instance() {
        let map = PortMap {
            instances: vec![
                crate::ports::InstancePorts {
                    socks_port: 9000,
                    control_port: 9900,
                },
                crate::ports::InstancePorts {
                    socks_port: 9001,
                    control_port: 9901,
                },
            ],
            lb_front_port: 16379,
            filter_listen_port: None,
            dns_port: None,
        };
        let block = TemplateValues::backends_block(&map);
        assert!(block.contains("server s0 127.0.0.1:9000 check"));
        assert!(block.contains("server s1 127.0.0.1:9001 check"));
    }

    #[test]
    fn render_into_uses_independent_template_and_dest_names() {
        let templates_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            templates_dir.path().join("torrc.tmpl"),
            "SocksPort {SOCKS_PORT}\n",
        )
        .unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let mistrust = fs_mistrust::Mistrust::new_dangerously_trust_everyone();
        let checked = mistrust.verifier().secure_dir(dest_dir.path()).unwrap();

        render_into(
            templates_dir.path(),
            "torrc.tmpl",
            "torrc-0",
            &values(),
            &checked,
        )
        .unwrap();

        let rendered = std::fs::read_to_string(dest_dir.path().join("torrc-0")).unwrap();
        assert_eq!(rendered, "SocksPort 9000\n");
        assert!(!dest_dir.path().join("torrc.tmpl").exists());
    }
}

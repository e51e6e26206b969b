//! Service signature matching against open ports: an SSH banner parser
//! (RFC4253 version-exchange line, `SSH-protoversion-softwareversion
//! comment`) and an HTTP `Server`/`X-Powered-By` header parser, covering six
//! signatures: Apache, Nginx, IIS, OpenSSH, vsFTPd, FileZilla.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Result of matching a raw banner/response against the known signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceMatch {
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub banner: Option<String>,
}

/// Probe `addr` for a service banner, applying the HEAD probe for 80/8080/443
/// and the EHLO probe for 25/587, and a passive read otherwise (SSH sends its
/// version-exchange line unprompted).
pub async fn grab_banner(stream: &mut TcpStream, port: u16, read_timeout: Duration) -> Option<String> {
    match port {
        80 | 8080 | 443 => send_and_read(stream, b"HEAD / HTTP/1.0\r\n\r\n", read_timeout).await,
        25 | 587 => send_and_read(stream, b"EHLO stellar\r\n", read_timeout).await,
        _ => read_only(stream, read_timeout).await,
    }
}

async fn send_and_read(stream: &mut TcpStream, probe: &[u8], read_timeout: Duration) -> Option<String> {
    timeout(read_timeout, stream.write_all(probe)).await.ok()?.ok()?;
    read_only(stream, read_timeout).await
}

async fn read_only(stream: &mut TcpStream, read_timeout: Duration) -> Option<String> {
    let mut buf = [0u8; 1024];
    let n = timeout(read_timeout, stream.read(&mut buf)).await.ok()?.ok()?;
    if n == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&buf[..n]).into_owned())
}

/// Match a raw banner against the six named signatures.
pub fn match_signature(banner: &str) -> ServiceMatch {
    if let Some(m) = match_ssh(banner) {
        return m;
    }
    if let Some(m) = match_http(banner) {
        return m;
    }
    if let Some(m) = match_ftp_banner(banner) {
        return m;
    }
    ServiceMatch {
        banner: Some(banner.to_string()),
        ..Default::default()
    }
}

/// RFC4253 version-exchange line: `SSH-protoversion-softwareversion [comment]`.
fn match_ssh(banner: &str) -> Option<ServiceMatch> {
    let line = banner.lines().next()?.trim();
    if !line.starts_with("SSH-") {
        return None;
    }
    let rest = &line[4..];
    let (_proto_version, remainder) = rest.split_once('-')?;
    let software = remainder.split_whitespace().next().unwrap_or(remainder);

    trace!("matched ssh version-exchange line: {line}");

    if let Some(version) = software.strip_prefix("OpenSSH_") {
        return Some(ServiceMatch {
            service: Some("ssh".to_string()),
            product: Some("OpenSSH".to_string()),
            version: Some(version.trim_end_matches("p1").to_string()),
            banner: Some(line.to_string()),
        });
    }

    Some(ServiceMatch {
        service: Some("ssh".to_string()),
        product: None,
        version: None,
        banner: Some(line.to_string()),
    })
}

/// HTTP `Server:` header, looking for Apache/Nginx/IIS and the two named FTP
/// daemons' banners that sometimes ride along in a vhost's default page.
fn match_http(banner: &str) -> Option<ServiceMatch> {
    let server_header = banner
        .lines()
        .find(|line| line.to_ascii_lowercase().starts_with("server:"))?;
    let value = server_header.splitn(2, ':').nth(1)?.trim();

    trace!("matched http server header: {value}");

    let (product, version) = parse_product_version(value);
    let product_lower = product.to_ascii_lowercase();

    let canonical = if product_lower.contains("apache") {
        "Apache"
    } else if product_lower.contains("nginx") {
        "nginx"
    } else if product_lower.contains("iis") || product_lower.contains("microsoft-iis") {
        "IIS"
    } else {
        return Some(ServiceMatch {
            service: Some("http".to_string()),
            product: Some(product),
            version,
            banner: Some(value.to_string()),
        });
    };

    Some(ServiceMatch {
        service: Some("http".to_string()),
        product: Some(canonical.to_string()),
        version,
        banner: Some(value.to_string()),
    })
}

/// Split a `Product/Version` token into its parts.
fn parse_product_version(value: &str) -> (String, Option<String>) {
    let token = value.split_whitespace().next().unwrap_or(value);
    match token.split_once('/') {
        Some((product, version)) => (product.to_string(), Some(version.to_string())),
        None => (token.to_string(), None),
    }
}

/// FTP banners (vsFTPd/FileZilla) arrive unprompted as the `220` greeting
/// line, same shape as SSH's version-exchange line but on port 21.
pub fn match_ftp_banner(banner: &str) -> Option<ServiceMatch> {
    let line = banner.lines().next()?.trim();
    if !line.starts_with("220") {
        return None;
    }
    let lower = line.to_ascii_lowercase();

    if lower.contains("vsftpd") {
        let version = line
            .split_whitespace()
            .find(|tok| tok.to_ascii_lowercase().starts_with("vsftpd"))
            .and_then(|tok| tok.split_once(' '))
            .map(|(_, v)| v.to_string())
            .or_else(|| {
                line.split_whitespace()
                    .skip_while(|tok| !tok.to_ascii_lowercase().contains("vsftpd"))
                    .nth(1)
                    .map(|s| s.to_string())
            });
        return Some(ServiceMatch {
            service: Some("ftp".to_string()),
            product: Some("vsFTPd".to_string()),
            version,
            banner: Some(line.to_string()),
        });
    }

    if lower.contains("filezilla") {
        return Some(ServiceMatch {
            service: Some("ftp".to_string()),
            product: Some("FileZilla".to_string()),
            version: None,
            banner: Some(line.to_string()),
        });
    }

    Some(ServiceMatch {
        service: Some("ftp".to_string()),
        banner: Some(line.to_string()),
        ..Default::default()
    })
}

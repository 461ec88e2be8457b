//! Script asset URLs when uploads are fronted by a CDN.
//!
//! With an Azure CDN configured, the host's compiled script assets are
//! served through it as well: the host's own asset CDN prefix is swapped
//! for the Azure CDN origin, and brotli-capable clients get the `.br.`
//! variant of the file.

use crate::config::AzureSettings;

/// URL of a script asset at host-relative or absolute `path`.
///
/// `brotli` is whether the requesting client accepts brotli encoding.
pub fn script_asset_url(settings: &AzureSettings, path: &str, brotli: bool) -> String {
    let asset_cdn = settings
        .asset_cdn_url
        .as_deref()
        .map(|s| s.trim().trim_end_matches('/'))
        .filter(|s| !s.is_empty());

    match settings.cdn() {
        Some(cdn) => {
            let cdn = cdn.trim_end_matches('/');
            let url = match asset_cdn {
                Some(asset_cdn) => path.replace(asset_cdn, cdn),
                None => format!("{cdn}{path}"),
            };
            if brotli {
                brotli_variant(&url)
            } else {
                url
            }
        }
        None => match asset_cdn {
            Some(asset_cdn) if brotli && asset_cdn.starts_with("https") => path.replace(
                &format!("{asset_cdn}/assets/"),
                &format!("{asset_cdn}/brotli_asset/"),
            ),
            _ => path.to_string(),
        },
    }
}

/// `app.js` becomes `app.br.js`; paths without an extension are unchanged.
pub fn brotli_variant(url: &str) -> String {
    let file_start = url.rfind('/').map_or(0, |i| i + 1);
    match url[file_start..].rfind('.') {
        Some(dot) => {
            let dot = file_start + dot;
            format!("{}.br{}", &url[..dot], &url[dot..])
        }
        None => url.to_string(),
    }
}

/// Preload hint plus script tag for `url`, escaped for a quoted attribute.
pub fn preload_script_tags(url: &str) -> String {
    let url = quick_xml::escape::escape(url);
    format!("<link rel='preload' href='{url}' as='script'/><script src='{url}'></script>")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(cdn: Option<&str>, asset_cdn: Option<&str>) -> AzureSettings {
        AzureSettings {
            enabled: true,
            account_name: "acct".to_string(),
            container_name: "uploads".to_string(),
            cdn_url: cdn.map(String::from),
            asset_cdn_url: asset_cdn.map(String::from),
            ..AzureSettings::default()
        }
    }

    #[test]
    fn test_relative_asset_is_prefixed_with_cdn() {
        let s = settings(Some("https://blobcdn.example.com/"), None);
        assert_eq!(
            script_asset_url(&s, "/assets/app-abc.js", false),
            "https://blobcdn.example.com/assets/app-abc.js"
        );
    }

    #[test]
    fn test_asset_cdn_is_swapped() {
        let s = settings(
            Some("https://blobcdn.example.com"),
            Some("https://assets.example.com"),
        );
        assert_eq!(
            script_asset_url(&s, "https://assets.example.com/assets/app-abc.js", true),
            "https://blobcdn.example.com/assets/app-abc.br.js"
        );
    }

    #[test]
    fn test_brotli_path_on_asset_cdn_without_azure_cdn() {
        let s = settings(None, Some("https://assets.example.com"));
        assert_eq!(
            script_asset_url(&s, "https://assets.example.com/assets/app.js", true),
            "https://assets.example.com/brotli_asset/app.js"
        );
        assert_eq!(
            script_asset_url(&s, "https://assets.example.com/assets/app.js", false),
            "https://assets.example.com/assets/app.js"
        );

        let plain = settings(None, Some("http://assets.example.com"));
        assert_eq!(
            script_asset_url(&plain, "http://assets.example.com/assets/app.js", true),
            "http://assets.example.com/assets/app.js"
        );
    }

    #[test]
    fn test_brotli_variant() {
        assert_eq!(brotli_variant("/assets/app.min.js"), "/assets/app.min.br.js");
        assert_eq!(brotli_variant("https://cdn.example.com/v1.2/app"), "https://cdn.example.com/v1.2/app");
    }

    #[test]
    fn test_preload_script_tags() {
        assert_eq!(
            preload_script_tags("/a.js"),
            "<link rel='preload' href='/a.js' as='script'/><script src='/a.js'></script>"
        );
    }

    #[test]
    fn test_preload_script_tags_escape_url() {
        assert_eq!(
            preload_script_tags("https://cdn.example.com/a.js?x=1&y='2'"),
            "<link rel='preload' href='https://cdn.example.com/a.js?x=1&amp;y=&apos;2&apos;' as='script'/>\
             <script src='https://cdn.example.com/a.js?x=1&amp;y=&apos;2&apos;'></script>"
        );
    }
}

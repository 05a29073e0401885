use crate::config::NameTemplates;
use crate::error::{Error, Result};

pub fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Join a location (directory or URL prefix) and a relative name with exactly
/// one `/` between them. An empty location yields the name unchanged.
pub fn join_location(location: &str, name: &str) -> String {
    if location.is_empty() {
        return name.to_string();
    }
    if name.starts_with('/') && !is_http_url(location) {
        return name.to_string();
    }
    let name = name.trim_start_matches('/');
    if location.ends_with('/') {
        format!("{location}{name}")
    } else {
        format!("{location}/{name}")
    }
}

/// Pair input locations with the templates to look for at each one.
///
/// - `check_all`: every location gets every template
/// - equal lengths: location `i` gets template group `i`
/// - one location, several groups: that location gets all of them
///
/// Any other combination is a configuration error.
pub fn pair_locations(
    locations: &[String],
    templates: &NameTemplates,
    check_all: bool,
) -> Result<Vec<(String, Vec<String>)>> {
    if locations.is_empty() {
        return Err(Error::Config("no input locations configured".into()));
    }
    if templates.is_empty() {
        return Err(Error::Config("no file templates configured".into()));
    }

    if check_all {
        let all = templates.flatten();
        return Ok(locations.iter().map(|loc| (loc.clone(), all.clone())).collect());
    }

    if locations.len() == templates.len() {
        return Ok(locations
            .iter()
            .cloned()
            .zip(templates.groups().iter().cloned())
            .collect());
    }

    if locations.len() == 1 && templates.len() > 1 {
        return Ok(vec![(locations[0].clone(), templates.flatten())]);
    }

    Err(Error::Config(format!(
        "cannot pair {} input locations with {} file templates; check the locations and templates",
        locations.len(),
        templates.len()
    )))
}

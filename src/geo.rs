//! Static IANA timezone to city/flag mapping for presence display.
//!
//! Unknown zones fall back to the city segment of the zone name and a
//! continent flag derived from the zone prefix.

/// Known zones. Kept sorted by zone name for readability.
const ZONES: &[(&str, &str, &str)] = &[
    ("Africa/Cairo", "Cairo", "\u{1F1EA}\u{1F1EC}"),
    ("Africa/Johannesburg", "Johannesburg", "\u{1F1FF}\u{1F1E6}"),
    ("Africa/Lagos", "Lagos", "\u{1F1F3}\u{1F1EC}"),
    ("Africa/Nairobi", "Nairobi", "\u{1F1F0}\u{1F1EA}"),
    ("America/Argentina/Buenos_Aires", "Buenos Aires", "\u{1F1E6}\u{1F1F7}"),
    ("America/Bogota", "Bogota", "\u{1F1E8}\u{1F1F4}"),
    ("America/Chicago", "Chicago", "\u{1F1FA}\u{1F1F8}"),
    ("America/Denver", "Denver", "\u{1F1FA}\u{1F1F8}"),
    ("America/Lima", "Lima", "\u{1F1F5}\u{1F1EA}"),
    ("America/Los_Angeles", "Los Angeles", "\u{1F1FA}\u{1F1F8}"),
    ("America/Mexico_City", "Mexico City", "\u{1F1F2}\u{1F1FD}"),
    ("America/New_York", "New York", "\u{1F1FA}\u{1F1F8}"),
    ("America/Phoenix", "Phoenix", "\u{1F1FA}\u{1F1F8}"),
    ("America/Santiago", "Santiago", "\u{1F1E8}\u{1F1F1}"),
    ("America/Sao_Paulo", "Sao Paulo", "\u{1F1E7}\u{1F1F7}"),
    ("America/Toronto", "Toronto", "\u{1F1E8}\u{1F1E6}"),
    ("America/Vancouver", "Vancouver", "\u{1F1E8}\u{1F1E6}"),
    ("Asia/Bangkok", "Bangkok", "\u{1F1F9}\u{1F1ED}"),
    ("Asia/Dubai", "Dubai", "\u{1F1E6}\u{1F1EA}"),
    ("Asia/Hong_Kong", "Hong Kong", "\u{1F1ED}\u{1F1F0}"),
    ("Asia/Jakarta", "Jakarta", "\u{1F1EE}\u{1F1E9}"),
    ("Asia/Kolkata", "Kolkata", "\u{1F1EE}\u{1F1F3}"),
    ("Asia/Manila", "Manila", "\u{1F1F5}\u{1F1ED}"),
    ("Asia/Seoul", "Seoul", "\u{1F1F0}\u{1F1F7}"),
    ("Asia/Shanghai", "Shanghai", "\u{1F1E8}\u{1F1F3}"),
    ("Asia/Singapore", "Singapore", "\u{1F1F8}\u{1F1EC}"),
    ("Asia/Taipei", "Taipei", "\u{1F1F9}\u{1F1FC}"),
    ("Asia/Tel_Aviv", "Tel Aviv", "\u{1F1EE}\u{1F1F1}"),
    ("Asia/Tokyo", "Tokyo", "\u{1F1EF}\u{1F1F5}"),
    ("Australia/Melbourne", "Melbourne", "\u{1F1E6}\u{1F1FA}"),
    ("Australia/Perth", "Perth", "\u{1F1E6}\u{1F1FA}"),
    ("Australia/Sydney", "Sydney", "\u{1F1E6}\u{1F1FA}"),
    ("Europe/Amsterdam", "Amsterdam", "\u{1F1F3}\u{1F1F1}"),
    ("Europe/Athens", "Athens", "\u{1F1EC}\u{1F1F7}"),
    ("Europe/Berlin", "Berlin", "\u{1F1E9}\u{1F1EA}"),
    ("Europe/Dublin", "Dublin", "\u{1F1EE}\u{1F1EA}"),
    ("Europe/Helsinki", "Helsinki", "\u{1F1EB}\u{1F1EE}"),
    ("Europe/Istanbul", "Istanbul", "\u{1F1F9}\u{1F1F7}"),
    ("Europe/Lisbon", "Lisbon", "\u{1F1F5}\u{1F1F9}"),
    ("Europe/London", "London", "\u{1F1EC}\u{1F1E7}"),
    ("Europe/Madrid", "Madrid", "\u{1F1EA}\u{1F1F8}"),
    ("Europe/Moscow", "Moscow", "\u{1F1F7}\u{1F1FA}"),
    ("Europe/Oslo", "Oslo", "\u{1F1F3}\u{1F1F4}"),
    ("Europe/Paris", "Paris", "\u{1F1EB}\u{1F1F7}"),
    ("Europe/Prague", "Prague", "\u{1F1E8}\u{1F1FF}"),
    ("Europe/Rome", "Rome", "\u{1F1EE}\u{1F1F9}"),
    ("Europe/Stockholm", "Stockholm", "\u{1F1F8}\u{1F1EA}"),
    ("Europe/Vienna", "Vienna", "\u{1F1E6}\u{1F1F9}"),
    ("Europe/Warsaw", "Warsaw", "\u{1F1F5}\u{1F1F1}"),
    ("Europe/Zurich", "Zurich", "\u{1F1E8}\u{1F1ED}"),
    ("Pacific/Auckland", "Auckland", "\u{1F1F3}\u{1F1FF}"),
    ("Pacific/Honolulu", "Honolulu", "\u{1F1FA}\u{1F1F8}"),
    ("UTC", "UTC", "\u{1F310}"),
];

/// Flag shown for zones we have no country flag for, by continent prefix.
fn continent_flag(timezone: &str) -> &'static str {
    match timezone.split('/').next().unwrap_or("") {
        "Europe" => "\u{1F1EA}\u{1F1FA}",
        "America" => "\u{1F30E}",
        "Asia" => "\u{1F30F}",
        "Africa" => "\u{1F30D}",
        "Australia" => "\u{1F1E6}\u{1F1FA}",
        "Pacific" => "\u{1F30F}",
        _ => "\u{1F310}",
    }
}

/// Resolve an IANA timezone string to a display city and flag.
/// Unknown zones use the last path segment (underscores to spaces) as the
/// city and a continent-level flag.
pub fn resolve(timezone: &str) -> (String, String) {
    for (zone, city, flag) in ZONES {
        if *zone == timezone {
            return ((*city).to_string(), (*flag).to_string());
        }
    }
    let city = timezone
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("Somewhere")
        .replace('_', " ");
    (city, continent_flag(timezone).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_zones() {
        assert_eq!(
            resolve("Europe/Berlin"),
            ("Berlin".to_string(), "\u{1F1E9}\u{1F1EA}".to_string())
        );
        assert_eq!(
            resolve("America/New_York"),
            ("New York".to_string(), "\u{1F1FA}\u{1F1F8}".to_string())
        );
        assert_eq!(
            resolve("Asia/Tokyo"),
            ("Tokyo".to_string(), "\u{1F1EF}\u{1F1F5}".to_string())
        );
    }

    #[test]
    fn test_unknown_zone_falls_back_to_segment_and_continent() {
        let (city, flag) = resolve("Europe/Ljubljana");
        assert_eq!(city, "Ljubljana");
        assert_eq!(flag, "\u{1F1EA}\u{1F1FA}");

        let (city, flag) = resolve("America/Indiana/Indianapolis");
        assert_eq!(city, "Indianapolis");
        assert_eq!(flag, "\u{1F30E}");
    }

    #[test]
    fn test_underscores_become_spaces() {
        let (city, _) = resolve("Asia/Phnom_Penh");
        assert_eq!(city, "Phnom Penh");
    }

    #[test]
    fn test_garbage_input() {
        let (city, flag) = resolve("not-a-zone");
        assert_eq!(city, "not-a-zone");
        assert_eq!(flag, "\u{1F310}");

        let (city, flag) = resolve("");
        assert_eq!(city, "Somewhere");
        assert_eq!(flag, "\u{1F310}");
    }
}

//! Phrase normalisation shared by the pattern and fuzzy layers
//!
//! Maps everyday descriptions ("a web browser", "my wifi") onto the names
//! the system actually acts on (`firefox`, `NetworkManager`).

const PACKAGE_PHRASES: &[(&str, &str)] = &[
    ("web browser", "firefox"),
    ("internet browser", "firefox"),
    ("browser", "firefox"),
    ("chrome", "google-chrome"),
    ("text editor", "neovim"),
    ("code editor", "vscode"),
    ("programming editor", "vscode"),
    ("visual studio", "vscode"),
    ("vs code", "vscode"),
    ("coding program", "vscode"),
    ("email client", "thunderbird"),
    ("email", "thunderbird"),
    ("mail", "thunderbird"),
    ("video chat", "zoom"),
    ("video call", "zoom"),
    ("chat", "discord"),
    ("music player", "spotify"),
    ("music", "spotify"),
    ("video player", "vlc"),
    ("movie player", "vlc"),
    ("photo editor", "gimp"),
    ("image editor", "gimp"),
    ("word processor", "libreoffice"),
    ("spreadsheet", "libreoffice"),
    ("office", "libreoffice"),
    ("python", "python3"),
    ("node", "nodejs"),
];

const SERVICE_NAMES: &[(&str, &str)] = &[
    ("wifi", "NetworkManager"),
    ("wi-fi", "NetworkManager"),
    ("network", "NetworkManager"),
    ("internet", "NetworkManager"),
    ("sound", "pipewire"),
    ("audio", "pipewire"),
    ("bluetooth", "bluetooth"),
    ("printer", "cups"),
    ("printing", "cups"),
    ("ssh", "sshd"),
    ("web server", "nginx"),
    ("apache", "httpd"),
    ("database", "postgresql"),
    ("postgres", "postgresql"),
    ("docker", "docker"),
];

const SERVICE_VERBS: &[&str] = &["status", "start", "stop", "restart", "enable", "disable"];

const LEADING_FILLER: &[&str] = &["a ", "an ", "the ", "some ", "me ", "my "];

/// Resolve a free-text package description to a package name.
pub fn normalize_package_name(text: &str) -> String {
    let mut name = text.trim().to_lowercase();
    while let Some(rest) = LEADING_FILLER
        .iter()
        .find_map(|filler| name.strip_prefix(filler).map(str::to_string))
    {
        name = rest;
    }

    if let Some((_, package)) = PACKAGE_PHRASES.iter().find(|(phrase, _)| *phrase == name) {
        return (*package).to_string();
    }
    if name.contains(' ') {
        if let Some((_, package)) = PACKAGE_PHRASES
            .iter()
            .find(|(phrase, _)| phrase.contains(' ') && name.contains(phrase))
        {
            return (*package).to_string();
        }
    }

    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.' || *c == '_')
        .collect()
}

/// Broad problem area for a troubleshooting request.
pub fn identify_problem(text: &str) -> &'static str {
    let text = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if has(&["wifi", "wi-fi", "internet", "network", "connection", "online", "ethernet"]) {
        "network"
    } else if has(&["sound", "audio", "speaker", "volume", "headphone", "microphone"]) {
        "audio"
    } else if has(&["screen", "display", "monitor", "resolution", "graphics"]) {
        "display"
    } else if has(&["print"]) {
        "print"
    } else if has(&["bluetooth"]) {
        "bluetooth"
    } else if has(&["slow", "freeze", "frozen", "lag", "hang"]) {
        "performance"
    } else {
        "general"
    }
}

/// Setting a configuration request refers to.
pub fn identify_setting(text: &str) -> &'static str {
    let text = text.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if has(&["font", "text"]) {
        if has(&["bigger", "larger", "increase"]) {
            "font-size-increase"
        } else if has(&["smaller", "decrease"]) {
            "font-size-decrease"
        } else {
            "font-size"
        }
    } else if has(&["volume", "sound"]) {
        "volume"
    } else if has(&["brightness", "screen"]) {
        "brightness"
    } else if has(&["theme", "dark mode", "light mode"]) {
        "theme"
    } else if has(&["wallpaper", "background"]) {
        "wallpaper"
    } else if has(&["mouse", "touchpad", "trackpad"]) {
        "mouse"
    } else if has(&["keyboard", "layout"]) {
        "keyboard"
    } else {
        "general"
    }
}

/// Resolve a colloquial service name to its unit name.
pub fn normalize_service_name(text: &str) -> String {
    let name = text.trim().to_lowercase();
    let name = name
        .strip_prefix("the ")
        .or_else(|| name.strip_prefix("my "))
        .unwrap_or(&name)
        .trim_end_matches(" service")
        .trim();

    SERVICE_NAMES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, unit)| (*unit).to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Service verb named in the text, defaulting to `status`.
pub fn service_verb(text: &str) -> &'static str {
    let text = text.to_lowercase();
    text.split_whitespace()
        .find_map(|word| SERVICE_VERBS.iter().find(|verb| **verb == word).copied())
        .unwrap_or("status")
}

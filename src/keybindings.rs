/// Centralized keybinding definitions for NetLimit
/// Keeps the help overlay, status bar and key handlers in sync

#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub key: &'static str,
    pub description: &'static str,
    pub category: KeyCategory,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyCategory {
    Shaping,
    Editing,
    System,
}

impl KeyCategory {
    pub fn title(&self) -> &'static str {
        match self {
            KeyCategory::Shaping => "Shaping",
            KeyCategory::Editing => "Editing",
            KeyCategory::System => "System",
        }
    }
}

/// Get all keybindings
pub fn get_all_keybindings() -> Vec<KeyBinding> {
    vec![
        // Shaping
        KeyBinding {
            key: "Space",
            description: "Turn limiting on/off",
            category: KeyCategory::Shaping,
        },
        KeyBinding {
            key: "Enter",
            description: "Apply edited limit to the running session",
            category: KeyCategory::Shaping,
        },
        KeyBinding {
            key: "s",
            description: "Toggle split download/upload limits",
            category: KeyCategory::Shaping,
        },
        // Editing
        KeyBinding {
            key: "↑↓/Tab",
            description: "Select download or upload (split mode)",
            category: KeyCategory::Editing,
        },
        KeyBinding {
            key: "←→",
            description: "Adjust by 100 Kbps",
            category: KeyCategory::Editing,
        },
        KeyBinding {
            key: "Shift+←→",
            description: "Adjust by 10%",
            category: KeyCategory::Editing,
        },
        KeyBinding {
            key: "1-6",
            description: "Presets (512K, 1M, 10M, 100M, 500M, 1G)",
            category: KeyCategory::Editing,
        },
        KeyBinding {
            key: "n",
            description: "Type a rate (e.g. 750K, 2.5M, 1G)",
            category: KeyCategory::Editing,
        },
        // System
        KeyBinding {
            key: "h/?",
            description: "Toggle this help",
            category: KeyCategory::System,
        },
        KeyBinding {
            key: "q/Esc",
            description: "Quit (limiting is turned off)",
            category: KeyCategory::System,
        },
        KeyBinding {
            key: "Ctrl+C",
            description: "Force quit (always exits)",
            category: KeyCategory::System,
        },
    ]
}

/// Get keybindings for the status bar (most common ones)
pub fn get_status_bar_keybindings() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Space", "On/Off"),
        ("Enter", "Apply"),
        ("s", "Split"),
        ("←→", "Adjust"),
        ("1-6", "Presets"),
        ("n", "Enter rate"),
        ("h", "Help"),
        ("q", "Quit"),
    ]
}

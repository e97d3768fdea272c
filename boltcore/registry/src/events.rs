//! The closed event-name set for ON <event> handlers. Input events cover the
//! keyboard, mouse, and joystick; system events cover timing and program
//! state; the rest are reserved for expansion.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    // Input
    KeyPressed,
    KeyUp,
    KeyDown,
    LeftMouse,
    RightMouse,
    MiddleMouse,
    MouseMove,
    MouseWheel,
    FireButton,
    Fire2Button,
    JoystickUp,
    JoystickDown,
    JoystickLeft,
    JoystickRight,
    // System
    Timer,
    Frame,
    Second,
    Error,
    Break,
    // Reserved for expansion
    WindowResize,
    WindowFocus,
    WindowBlur,
    NetworkConnect,
    NetworkData,
    UserEvent,
}

const EVENT_TABLE: &[(&str, EventType)] = &[
    ("KEYPRESSED", EventType::KeyPressed),
    ("KEY_UP", EventType::KeyUp),
    ("KEY_DOWN", EventType::KeyDown),
    ("LEFT_MOUSE", EventType::LeftMouse),
    ("RIGHT_MOUSE", EventType::RightMouse),
    ("MIDDLE_MOUSE", EventType::MiddleMouse),
    ("MOUSE_MOVE", EventType::MouseMove),
    ("MOUSE_WHEEL", EventType::MouseWheel),
    ("FIRE_BUTTON", EventType::FireButton),
    ("FIRE2_BUTTON", EventType::Fire2Button),
    ("JOYSTICK_UP", EventType::JoystickUp),
    ("JOYSTICK_DOWN", EventType::JoystickDown),
    ("JOYSTICK_LEFT", EventType::JoystickLeft),
    ("JOYSTICK_RIGHT", EventType::JoystickRight),
    ("TIMER", EventType::Timer),
    ("FRAME", EventType::Frame),
    ("SECOND", EventType::Second),
    ("ERROR", EventType::Error),
    ("BREAK", EventType::Break),
    ("WINDOW_RESIZE", EventType::WindowResize),
    ("WINDOW_FOCUS", EventType::WindowFocus),
    ("WINDOW_BLUR", EventType::WindowBlur),
    ("NETWORK_CONNECT", EventType::NetworkConnect),
    ("NETWORK_DATA", EventType::NetworkData),
    ("USER_EVENT", EventType::UserEvent),
];

impl EventType {
    /// Case-insensitive lookup against the event-name table.
    pub fn from_name(name: &str) -> Option<EventType> {
        let upper = name.to_ascii_uppercase();
        EVENT_TABLE.iter().find(|(n, _)| *n == upper).map(|(_, e)| *e)
    }

    pub fn name(self) -> &'static str {
        EVENT_TABLE.iter().find(|(_, e)| *e == self).map(|(n, _)| *n).unwrap_or("UNKNOWN")
    }
}

pub fn is_valid_event_name(name: &str) -> bool {
    EventType::from_name(name).is_some()
}

pub fn all_event_names() -> Vec<&'static str> {
    EVENT_TABLE.iter().map(|(n, _)| *n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(is_valid_event_name("keypressed"));
        assert!(is_valid_event_name("Fire_Button"));
        assert!(!is_valid_event_name("NOT_AN_EVENT"));
        assert_eq!(EventType::from_name("timer"), Some(EventType::Timer));
        assert_eq!(EventType::Timer.name(), "TIMER");
    }
}

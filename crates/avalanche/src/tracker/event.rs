/// The `event` of an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Event {
    /// A regular poll, no `event` is sent.
    #[default]
    None,
    Completed,
    Started,
    Stopped,
}

impl Event {
    /// Value of the `event` query parameter, if any.
    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Event::None => None,
            Event::Completed => Some("completed"),
            Event::Started => Some("started"),
            Event::Stopped => Some("stopped"),
        }
    }
}

/// Shared handler state: the image reference every registry entry must be
/// able to serve, plus the credential checker. Both are fixed at startup;
/// nothing here is mutated between requests.
#[derive(Clone)]
pub struct WebhookState<C> {
    pub image: String,
    pub checker: C,
}

impl<C> WebhookState<C> {
    pub fn new(image: impl Into<String>, checker: C) -> Self {
        Self {
            image: image.into(),
            checker,
        }
    }
}

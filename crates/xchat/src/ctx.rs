/// The authenticated actor a service call runs on behalf of.
///
/// Establishing who the actor is belongs to the caller; services only
/// check that the user still exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ctx {
    user_id: String,
}

impl Ctx {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

pub mod server;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
}

impl Action {
    /// Providers the action will serve, for the telemetry resource.
    #[must_use]
    pub fn providers(&self) -> Vec<crate::provider::ProviderKind> {
        match self {
            Self::Server(args) => args.providers(),
        }
    }

    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
        }
    }
}

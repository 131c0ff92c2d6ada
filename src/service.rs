use rpc_calls::{
    BidiCall, CallError, ClientStreamCall, Deadline, ServerStreamCall, unary,
};

use crate::channel::{ChannelError, ChannelHandle};
use crate::config::ClientConfig;
use crate::proto::{
    EXCHANGE_PERSONS, GET_PERSON_INFORMATION, LIST_PERSONS, ListPersonRequest, PersonRequest,
    PersonResponse, SAVE_PERSONS,
};

/// Opens calls of each shape against `person.PersonService`.
///
/// Methods without a suffix use the default deadline from [`ClientConfig`];
/// the `_until` variants take an explicit one.
#[derive(Debug, Clone)]
pub struct PersonServiceClient {
    channel: ChannelHandle,
    config: ClientConfig,
}

impl PersonServiceClient {
    pub fn new(channel: ChannelHandle, config: ClientConfig) -> Self {
        Self { channel, config }
    }

    /// Connect to `config.addr` and wrap the channel.
    pub async fn connect(config: ClientConfig) -> Result<Self, ChannelError> {
        let channel = ChannelHandle::connect(&config).await?;
        Ok(Self::new(channel, config))
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Unary: look up one person.
    pub async fn get_person_information(
        &self,
        request: PersonRequest,
    ) -> Result<PersonResponse, CallError> {
        let deadline = Deadline::after(self.config.unary_timeout);
        self.get_person_information_until(request, deadline).await
    }

    pub async fn get_person_information_until(
        &self,
        request: PersonRequest,
        deadline: Deadline,
    ) -> Result<PersonResponse, CallError> {
        let call = self
            .channel
            .unary(GET_PERSON_INFORMATION, request, deadline);
        unary::invoke(deadline, call).await
    }

    /// Server stream: every person registered under an email.
    pub fn list_persons(&self, request: ListPersonRequest) -> ServerStreamCall<PersonResponse> {
        let deadline = Deadline::after(self.config.server_stream_timeout);
        self.list_persons_until(request, deadline)
    }

    pub fn list_persons_until(
        &self,
        request: ListPersonRequest,
        deadline: Deadline,
    ) -> ServerStreamCall<PersonResponse> {
        let channel = self.channel.clone();
        ServerStreamCall::open(deadline, async move {
            channel.server_streaming(LIST_PERSONS, request, deadline).await
        })
    }

    /// Client stream: save a batch of persons, one aggregate reply.
    pub fn save_persons(&self) -> ClientStreamCall<PersonRequest, PersonResponse> {
        let deadline = Deadline::after(self.config.client_stream_timeout);
        self.save_persons_until(deadline)
    }

    pub fn save_persons_until(
        &self,
        deadline: Deadline,
    ) -> ClientStreamCall<PersonRequest, PersonResponse> {
        let channel = self.channel.clone();
        ClientStreamCall::open(deadline, self.config.stream_buffer, move |requests| {
            async move {
                channel
                    .client_streaming(SAVE_PERSONS, requests, deadline)
                    .await
            }
        })
    }

    /// Bidirectional stream: persons out, persons back, at independent paces.
    pub fn exchange_persons(&self) -> BidiCall<PersonRequest, PersonResponse> {
        let deadline = Deadline::after(self.config.bidi_timeout);
        self.exchange_persons_until(deadline)
    }

    pub fn exchange_persons_until(
        &self,
        deadline: Deadline,
    ) -> BidiCall<PersonRequest, PersonResponse> {
        let channel = self.channel.clone();
        BidiCall::open(deadline, self.config.stream_buffer, move |requests| {
            async move { channel.streaming(EXCHANGE_PERSONS, requests, deadline).await }
        })
    }
}

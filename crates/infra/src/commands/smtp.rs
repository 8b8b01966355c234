//! SMTP configuration commands.

use std::collections::BTreeSet;

use tracing::{Span, instrument};

use keystone_core::{
    Aggregate, AggregateId, AggregateRoot, CommandContext, ExpectedVersion, ObjectDetails,
};
use keystone_instance::{
    ActivateSmtpConfig, AddSmtpConfig, ChangeSmtpConfig, ChangeSmtpConfigPassword,
    DeactivateSmtpConfig, Instance, InstanceCommand, RecordSmtpActivation, RemoveSmtpConfig,
    SmtpConfig, SmtpConfigCommand, SmtpConfigInput,
};

use super::{
    CommandError, Commands, instance_aggregate_id, instance_filter, object_details,
    reduce_instance, stream_append,
};
use crate::event_store::{EventFilter, StoredEvent};
use crate::reducer::{Rehydrated, reduce};

impl Commands {
    /// Create a new, inactive SMTP configuration. Returns its fresh id.
    #[instrument(
        skip(self, ctx, input, password),
        fields(instance_id = %ctx.instance_id(), aggregate_id = tracing::field::Empty)
    )]
    pub async fn add_smtp_config(
        &self,
        ctx: &CommandContext,
        input: &SmtpConfigInput,
        password: Option<&str>,
    ) -> Result<(AggregateId, ObjectDetails), CommandError> {
        let settings = input.validate()?;

        let instance_events = self.read(ctx, &instance_filter(ctx.instance_id())).await?;
        let instance = reduce_instance(ctx.instance_id(), &instance_events)?;
        let sender_policy = instance.aggregate.sender_policy(&self.default_domain_policy);
        sender_policy.check_sender(settings.sender_address())?;

        let id = self.next_id(ctx)?;
        Span::current().record("aggregate_id", id.as_str());

        let password = password.map(|p| self.encrypt(ctx, p)).transpose()?;

        let events = SmtpConfig::empty(id.clone()).handle(&SmtpConfigCommand::Add(AddSmtpConfig {
            id: id.clone(),
            settings,
            password,
            sender_policy,
        }))?;

        let append = stream_append::<SmtpConfig>(ctx, &id, ExpectedVersion::Exact(0), &events)?;
        let committed = self.push(ctx, vec![append]).await?;
        let details = object_details(ctx, SmtpConfig::AGGREGATE_TYPE, &id, None, &committed)?;
        Ok((id, details))
    }

    /// Replace the non-secret settings. Only changed fields are recorded.
    #[instrument(
        skip(self, ctx, id, input),
        fields(instance_id = %ctx.instance_id(), aggregate_id = %id)
    )]
    pub async fn change_smtp_config(
        &self,
        ctx: &CommandContext,
        id: &AggregateId,
        input: &SmtpConfigInput,
    ) -> Result<ObjectDetails, CommandError> {
        id.ensure_present()?;
        let settings = input.validate()?;

        let filter = instance_filter(ctx.instance_id()).aggregate(SmtpConfig::AGGREGATE_TYPE, id.clone());
        let events = self.read(ctx, &filter).await?;
        let config = reduce_config(ctx, id, &events)?;
        let instance = reduce_instance(ctx.instance_id(), &events)?;

        let command = SmtpConfigCommand::Change(ChangeSmtpConfig {
            id: id.clone(),
            settings,
            sender_policy: instance.aggregate.sender_policy(&self.default_domain_policy),
        });
        self.commit(ctx, id, config, &command).await
    }

    /// Store a new encrypted password. Never compared with the current one.
    #[instrument(
        skip(self, ctx, id, password),
        fields(instance_id = %ctx.instance_id(), aggregate_id = %id)
    )]
    pub async fn change_smtp_config_password(
        &self,
        ctx: &CommandContext,
        id: &AggregateId,
        password: &str,
    ) -> Result<ObjectDetails, CommandError> {
        id.ensure_present()?;

        let events = self.read(ctx, &config_filter(id)).await?;
        let config = reduce_config(ctx, id, &events)?;
        if !config.aggregate.exists() {
            return Err(CommandError::NotFound(format!("smtp config '{id}'")));
        }

        let command = SmtpConfigCommand::ChangePassword(ChangeSmtpConfigPassword {
            id: id.clone(),
            password: self.encrypt(ctx, password)?,
        });
        self.commit(ctx, id, config, &command).await
    }

    /// Activate a configuration, deactivating the currently active one (if
    /// any) in the same push.
    ///
    /// The push also records the activation on the instance stream at its
    /// observed head, so two concurrent activations conflict even when no
    /// configuration was active before.
    #[instrument(skip(self, ctx, id), fields(instance_id = %ctx.instance_id(), aggregate_id = %id))]
    pub async fn activate_smtp_config(
        &self,
        ctx: &CommandContext,
        id: &AggregateId,
    ) -> Result<ObjectDetails, CommandError> {
        id.ensure_present()?;

        let filter = instance_filter(ctx.instance_id()).aggregate_type(SmtpConfig::AGGREGATE_TYPE);
        let events = self.read(ctx, &filter).await?;
        let target = reduce_config(ctx, id, &events)?;
        let instance = reduce_instance(ctx.instance_id(), &events)?;

        let activated = target
            .aggregate
            .handle(&SmtpConfigCommand::Activate(ActivateSmtpConfig { id: id.clone() }))?;
        let instance_id = instance_aggregate_id(ctx.instance_id());
        let recorded = instance.aggregate.handle(&InstanceCommand::RecordSmtpActivation(
            RecordSmtpActivation {
                instance_id: instance_id.clone(),
                smtp_config_id: id.clone(),
            },
        ))?;
        let mut appends = vec![
            stream_append::<SmtpConfig>(ctx, id, ExpectedVersion::Exact(target.version), &activated)?,
            stream_append::<Instance>(
                ctx,
                &instance_id,
                ExpectedVersion::Exact(instance.version),
                &recorded,
            )?,
        ];

        let others: BTreeSet<&AggregateId> = events
            .iter()
            .filter(|e| e.aggregate_type == SmtpConfig::AGGREGATE_TYPE)
            .map(|e| &e.aggregate_id)
            .filter(|other| *other != id)
            .collect();
        for other_id in others {
            let other = reduce_config(ctx, other_id, &events)?;
            if !other.aggregate.is_active() {
                continue;
            }
            let deactivated = other.aggregate.handle(&SmtpConfigCommand::Deactivate(
                DeactivateSmtpConfig {
                    id: other_id.clone(),
                },
            ))?;
            appends.push(stream_append::<SmtpConfig>(
                ctx,
                other_id,
                ExpectedVersion::Exact(other.version),
                &deactivated,
            )?);
        }

        let committed = self.push(ctx, appends).await?;
        object_details(ctx, SmtpConfig::AGGREGATE_TYPE, id, target.created_at, &committed)
    }

    #[instrument(skip(self, ctx, id), fields(instance_id = %ctx.instance_id(), aggregate_id = %id))]
    pub async fn deactivate_smtp_config(
        &self,
        ctx: &CommandContext,
        id: &AggregateId,
    ) -> Result<ObjectDetails, CommandError> {
        id.ensure_present()?;

        let events = self.read(ctx, &config_filter(id)).await?;
        let config = reduce_config(ctx, id, &events)?;
        let command = SmtpConfigCommand::Deactivate(DeactivateSmtpConfig { id: id.clone() });
        self.commit(ctx, id, config, &command).await
    }

    /// Remove a configuration for good. The id is never reused.
    #[instrument(skip(self, ctx, id), fields(instance_id = %ctx.instance_id(), aggregate_id = %id))]
    pub async fn remove_smtp_config(
        &self,
        ctx: &CommandContext,
        id: &AggregateId,
    ) -> Result<ObjectDetails, CommandError> {
        id.ensure_present()?;

        let events = self.read(ctx, &config_filter(id)).await?;
        let config = reduce_config(ctx, id, &events)?;
        let command = SmtpConfigCommand::Remove(RemoveSmtpConfig { id: id.clone() });
        self.commit(ctx, id, config, &command).await
    }

    /// Handle a command against a rehydrated configuration and push the result
    /// at the observed version.
    async fn commit(
        &self,
        ctx: &CommandContext,
        id: &AggregateId,
        config: Rehydrated<SmtpConfig>,
        command: &SmtpConfigCommand,
    ) -> Result<ObjectDetails, CommandError> {
        let events = config.aggregate.handle(command)?;
        let append = stream_append::<SmtpConfig>(
            ctx,
            id,
            ExpectedVersion::Exact(config.version),
            &events,
        )?;
        let committed = self.push(ctx, vec![append]).await?;
        object_details(ctx, SmtpConfig::AGGREGATE_TYPE, id, config.created_at, &committed)
    }
}

fn config_filter(id: &AggregateId) -> EventFilter {
    EventFilter::new().aggregate(SmtpConfig::AGGREGATE_TYPE, id.clone())
}

fn reduce_config(
    ctx: &CommandContext,
    id: &AggregateId,
    events: &[StoredEvent],
) -> Result<Rehydrated<SmtpConfig>, CommandError> {
    Ok(reduce(ctx.instance_id(), id, events, SmtpConfig::empty(id.clone()))?)
}

//! Instance domain and domain policy commands.

use tracing::instrument;

use keystone_core::{Aggregate, AggregateRoot, CommandContext, ExpectedVersion, ObjectDetails};
use keystone_instance::{
    AddDomainPolicy, AddInstanceDomain, ChangeDomainPolicy, DomainPolicy, Instance,
    InstanceCommand, RemoveInstanceDomain,
};

use super::{
    CommandError, Commands, instance_aggregate_id, instance_filter, object_details,
    reduce_instance, stream_append,
};

impl Commands {
    /// Add a (verified) domain to the instance.
    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id()))]
    pub async fn add_instance_domain(
        &self,
        ctx: &CommandContext,
        domain: &str,
    ) -> Result<ObjectDetails, CommandError> {
        let instance_id = instance_aggregate_id(ctx.instance_id());
        self.execute_instance(
            ctx,
            InstanceCommand::AddDomain(AddInstanceDomain {
                instance_id,
                domain: domain.to_string(),
                generated: false,
            }),
        )
        .await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id()))]
    pub async fn remove_instance_domain(
        &self,
        ctx: &CommandContext,
        domain: &str,
    ) -> Result<ObjectDetails, CommandError> {
        let instance_id = instance_aggregate_id(ctx.instance_id());
        self.execute_instance(
            ctx,
            InstanceCommand::RemoveDomain(RemoveInstanceDomain {
                instance_id,
                domain: domain.to_string(),
            }),
        )
        .await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id()))]
    pub async fn add_domain_policy(
        &self,
        ctx: &CommandContext,
        policy: DomainPolicy,
    ) -> Result<ObjectDetails, CommandError> {
        let instance_id = instance_aggregate_id(ctx.instance_id());
        self.execute_instance(
            ctx,
            InstanceCommand::AddDomainPolicy(AddDomainPolicy {
                instance_id,
                policy,
            }),
        )
        .await
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id()))]
    pub async fn change_domain_policy(
        &self,
        ctx: &CommandContext,
        policy: DomainPolicy,
    ) -> Result<ObjectDetails, CommandError> {
        let instance_id = instance_aggregate_id(ctx.instance_id());
        self.execute_instance(
            ctx,
            InstanceCommand::ChangeDomainPolicy(ChangeDomainPolicy {
                instance_id,
                policy,
            }),
        )
        .await
    }

    async fn execute_instance(
        &self,
        ctx: &CommandContext,
        command: InstanceCommand,
    ) -> Result<ObjectDetails, CommandError> {
        let instance_id = instance_aggregate_id(ctx.instance_id());
        instance_id.ensure_present()?;

        let events = self.read(ctx, &instance_filter(ctx.instance_id())).await?;
        let instance = reduce_instance(ctx.instance_id(), &events)?;
        let new_events = instance.aggregate.handle(&command)?;

        let append = stream_append::<Instance>(
            ctx,
            &instance_id,
            ExpectedVersion::Exact(instance.version),
            &new_events,
        )?;
        let committed = self.push(ctx, vec![append]).await?;
        object_details(
            ctx,
            Instance::AGGREGATE_TYPE,
            &instance_id,
            instance.created_at,
            &committed,
        )
    }
}

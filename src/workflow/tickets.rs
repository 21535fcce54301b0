//! Ticket listing and resolution

use tracing::info;

use super::Gatekeeper;
use super::{ResolveRequest, TicketDetail, TicketView};
use crate::authz::{can, Action, Principal};
use crate::model::{Page, PageRequest, Resolution, TicketId};
use crate::tickets::resource_of;
use crate::types::Result;

impl Gatekeeper {
    /// Tickets the caller may resolve, newest first
    pub async fn list_assigned_tickets(
        &self,
        principal: Option<&Principal>,
        include_resolved: bool,
        page: PageRequest,
    ) -> Result<Page<TicketView>> {
        let principal = self.require(principal)?;
        if !principal.active {
            return Ok(Page::slice(Vec::new(), page));
        }

        let tickets = self
            .tickets
            .list_assigned(principal, include_resolved, page)
            .await;
        let directory = self.directory().await;
        Ok(tickets.map(|t| directory.ticket(&t)))
    }

    /// Tickets the caller filed, newest first
    pub async fn list_my_tickets(
        &self,
        principal: Option<&Principal>,
        page: PageRequest,
    ) -> Result<Page<TicketView>> {
        let principal = self.require(principal)?;
        let tickets = self.tickets.list_requested(principal.user_id, page).await;
        let directory = self.directory().await;
        Ok(tickets.map(|t| directory.ticket(&t)))
    }

    /// Ticket with history. Callers unrelated to the ticket get `Forbidden`.
    pub async fn ticket_detail(
        &self,
        principal: Option<&Principal>,
        id: TicketId,
    ) -> Result<TicketDetail> {
        let principal = self.require(principal)?;
        let ticket = self.tickets.get(id).await?;
        can(Some(principal), Action::ViewTicket, resource_of(&ticket)).into_result()?;

        let can_resolve = ticket.is_pending()
            && can(Some(principal), Action::ResolveTicket, resource_of(&ticket)).is_allowed();
        let directory = self.directory().await;
        Ok(TicketDetail {
            ticket: directory.ticket(&ticket),
            history: ticket.history.iter().map(|e| directory.event(e)).collect(),
            can_resolve,
        })
    }

    /// Approve or reject a pending ticket. Approval applies the side effect
    /// and the status change together or not at all.
    pub async fn resolve_ticket(
        &self,
        principal: Option<&Principal>,
        id: TicketId,
        request: ResolveRequest,
    ) -> Result<TicketView> {
        let principal = self.require(principal)?;
        let resolution: Resolution = request.action.parse()?;

        let ticket = self
            .tickets
            .resolve(id, resolution, principal, request.reason)
            .await?;

        info!(
            ticket_id = %ticket.id,
            action = %ticket.status,
            user_id = %principal.user_id,
            "Ticket resolution recorded"
        );
        Ok(self.directory().await.ticket(&ticket))
    }
}

// Request routing for one adapter
//
// Routes are scanned in order. The first entry whose name and signature both
// match wins; a name match with another signature only changes the error
// reported if nothing else matches.

use log::{debug, info};

use crate::error::AdapterError;
use crate::handlers::{
    bonding, discovery, local, mode, remote, Context, Handler, HandlerResult, Services,
};
use crate::message::{Request, Response};
use crate::session::{AdapterHandle, AdapterSession};

pub const ADAPTER_INTERFACE: &str = "org.bluez.Adapter";

#[derive(Clone, Copy)]
pub struct Route {
    pub name: &'static str,
    pub signature: &'static str,
    pub handler: Handler,
}

impl Route {
    pub const fn new(name: &'static str, signature: &'static str, handler: Handler) -> Self {
        Self {
            name,
            signature,
            handler,
        }
    }
}

pub const ADAPTER_ROUTES: &[Route] = &[
    Route::new("GetAddress", "", local::get_address),
    Route::new("GetVersion", "", local::get_version),
    Route::new("GetRevision", "", local::get_revision),
    Route::new("GetManufacturer", "", local::get_manufacturer),
    Route::new("GetCompany", "", local::get_company),
    Route::new("GetFeatures", "", local::get_features),
    Route::new("GetMode", "", mode::get_mode),
    Route::new("SetMode", "s", mode::set_mode),
    Route::new("GetDiscoverableTimeout", "", mode::get_discoverable_timeout),
    Route::new("SetDiscoverableTimeout", "u", mode::set_discoverable_timeout),
    Route::new("IsConnectable", "", mode::is_connectable),
    Route::new("IsDiscoverable", "", mode::is_discoverable),
    Route::new("GetMajorClass", "", local::get_major_class),
    Route::new("GetMinorClass", "", local::get_minor_class),
    Route::new("SetMinorClass", "s", local::set_minor_class),
    Route::new("GetServiceClasses", "", local::get_service_classes),
    Route::new("GetName", "", local::get_name),
    Route::new("SetName", "s", local::set_name),
    Route::new("GetRemoteVersion", "s", remote::get_remote_version),
    Route::new("GetRemoteRevision", "s", remote::get_remote_revision),
    Route::new("GetRemoteManufacturer", "s", remote::get_remote_manufacturer),
    Route::new("GetRemoteCompany", "s", remote::get_remote_company),
    Route::new("GetRemoteName", "s", remote::get_remote_name),
    Route::new("GetRemoteAlias", "s", remote::get_remote_alias),
    Route::new("SetRemoteAlias", "ss", remote::set_remote_alias),
    Route::new("LastSeen", "s", remote::last_seen),
    Route::new("LastUsed", "s", remote::last_used),
    Route::new("CreateBonding", "s", bonding::create_bonding),
    Route::new("RemoveBonding", "s", bonding::remove_bonding),
    Route::new("HasBonding", "s", bonding::has_bonding),
    Route::new("ListBondings", "", bonding::list_bondings),
    Route::new("GetPinCodeLength", "s", bonding::get_pin_code_length),
    Route::new("GetEncryptionKeySize", "s", bonding::get_encryption_key_size),
    Route::new("DiscoverDevices", "", discovery::discover_devices),
    Route::new("CancelDiscovery", "", discovery::cancel_discovery),
    Route::new("DiscoverCache", "", discovery::discover_cache),
    Route::new("DiscoverService", "s", discovery::discover_service),
];

/// Outcome of offering a request to a dispatcher.
#[derive(Debug)]
pub enum Dispatch {
    /// The request was handled. `deliver` is false when the caller asked for
    /// no reply; the response is still built.
    Reply { response: Response, deliver: bool },
    /// Not addressed to this interface; the next dispatcher may take it.
    NotHandled(Request),
}

pub struct Dispatcher {
    routes: Vec<Route>,
    session: AdapterSession,
    services: Services,
}

impl Dispatcher {
    pub fn new(session: AdapterSession, services: Services) -> Self {
        Self::with_routes(ADAPTER_ROUTES.to_vec(), session, services)
    }

    pub fn with_routes(routes: Vec<Route>, session: AdapterSession, services: Services) -> Self {
        Self {
            routes,
            session,
            services,
        }
    }

    /// Appends a route; it is tried after every existing one.
    pub fn register(&mut self, route: Route) {
        self.routes.push(route);
    }

    pub fn handle(&self) -> &AdapterHandle {
        self.session.handle()
    }

    pub fn session(&self) -> &AdapterSession {
        &self.session
    }

    pub fn resolve(&self, member: &str, signature: &str) -> Result<Handler, AdapterError> {
        let mut error = AdapterError::unknown_method(member);
        for route in self.routes.iter().filter(|route| route.name == member) {
            if route.signature == signature {
                return Ok(route.handler);
            }
            error = AdapterError::wrong_signature(member, signature);
        }
        Err(error)
    }

    pub fn dispatch(&mut self, request: Request) -> Dispatch {
        info!(
            "Adapter path:{} iface:{} method:{}",
            request.path, request.interface, request.member
        );

        if request.interface != ADAPTER_INTERFACE {
            return Dispatch::NotHandled(request);
        }

        let response = request.respond(self.invoke(&request));
        if request.no_reply {
            debug!(
                "{} from {} expects no reply",
                request.member, request.sender
            );
        }
        Dispatch::Reply {
            response,
            deliver: !request.no_reply,
        }
    }

    fn invoke(&mut self, request: &Request) -> HandlerResult {
        if !self.session.is_up() || request.path != self.session.handle().path() {
            return Err(AdapterError::unknown_path(&request.path));
        }

        let handler = self.resolve(&request.member, &request.signature())?;
        let (adapter, state) = self.session.parts_mut();
        let mut context = Context {
            adapter,
            state,
            services: &self.services,
            caller: &request.sender,
        };
        handler(&mut context, &request.args)
    }

    pub fn inquiry_complete(&mut self) {
        let (adapter, state) = self.session.parts_mut();
        discovery::inquiry_complete(adapter, state, &self.services);
    }

    /// Marks the adapter up or down. Going down ends any running discovery;
    /// coming up re-reads the scan mode.
    pub fn set_up(&mut self, up: bool) {
        if up == self.session.is_up() {
            return;
        }
        info!(
            "{} is {}",
            self.session.handle().name(),
            if up { "up" } else { "down" }
        );
        self.session.set_up(up);
        if up {
            self.refresh();
        } else {
            self.inquiry_complete();
        }
    }

    pub fn refresh(&mut self) {
        let (adapter, state) = self.session.parts_mut();
        mode::refresh_scan_mode(adapter, state, &self.services);
    }
}

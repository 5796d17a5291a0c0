use std::fmt;

use invoice_desk_backend::User;

/// Which auth screen is shown to a signed-out visitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPage {
    #[default]
    Login,
    Signup,
}

/// Administrator sidebar entries, in menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdminSection {
    #[default]
    Overview,
    Users,
    Invoices,
    FormBuilder,
    Reports,
    Files,
    Security,
    Settings,
}

impl AdminSection {
    pub const ALL: [AdminSection; 8] = [
        Self::Overview,
        Self::Users,
        Self::Invoices,
        Self::FormBuilder,
        Self::Reports,
        Self::Files,
        Self::Security,
        Self::Settings,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::Overview => "dashboard",
            Self::Users => "users",
            Self::Invoices => "invoices",
            Self::FormBuilder => "forms",
            Self::Reports => "reports",
            Self::Files => "files",
            Self::Security => "security",
            Self::Settings => "settings",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Overview => "Dashboard",
            Self::Users => "Người dùng",
            Self::Invoices => "Hóa đơn",
            Self::FormBuilder => "Tạo biểu mẫu",
            Self::Reports => "Báo cáo",
            Self::Files => "Tài liệu",
            Self::Security => "Bảo mật",
            Self::Settings => "Cài đặt",
        }
    }

    pub fn parse(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL
            .into_iter()
            .find(|section| section.id().eq_ignore_ascii_case(id))
    }
}

impl fmt::Display for AdminSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardView {
    /// Capture panel plus assistant chat.
    Workspace,
    Admin(AdminSection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Auth(AuthPage),
    Dashboard(DashboardView),
}

/// Navigation choices that survive sign-in and sign-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavigationState {
    pub auth_page: AuthPage,
    pub admin_section: AdminSection,
}

/// The one place pages are chosen: auth screens when signed out, otherwise by role.
pub fn select_page(user: Option<&User>, nav: &NavigationState) -> Page {
    match user {
        None => Page::Auth(nav.auth_page),
        Some(user) if user.is_admin() => Page::Dashboard(DashboardView::Admin(nav.admin_section)),
        Some(_) => Page::Dashboard(DashboardView::Workspace),
    }
}

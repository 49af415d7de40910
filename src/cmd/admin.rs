//! Admin account management: `civic admin`.

use anyhow::{Context, Result, bail};
use civic_report::config::CivicToml;
use civic_report::portal::auth::{NewAdmin, create_admin};
use civic_report::portal::db::PortalDb;

use super::super::AdminCommands;

pub fn cmd_admin(config: &CivicToml, command: AdminCommands) -> Result<()> {
    let db = super::open_db(config)?;

    match command {
        AdminCommands::Create {
            email,
            password,
            name,
            role,
            department,
        } => {
            let department_id = match department {
                Some(name) => Some(
                    db.find_department(&name)?
                        .with_context(|| format!("Unknown department: {}", name))?
                        .id,
                ),
                None => None,
            };
            let admin = create_admin(
                &db,
                &NewAdmin {
                    email,
                    password,
                    full_name: name,
                    role,
                    department_id,
                },
            )?;
            println!("Created admin {} <{}> ({})", admin.full_name, admin.email, admin.id);
        }
        AdminCommands::List { all } => {
            let admins = db.list_admin_users(!all)?;
            if admins.is_empty() {
                println!("No admins found.");
                return Ok(());
            }
            for admin in admins {
                let dept = admin.department_name.as_deref().unwrap_or("-");
                let state = if admin.is_active { "" } else { " [inactive]" };
                println!(
                    "{:<24} {:<32} {:<10} {}{}",
                    admin.full_name, admin.email, admin.role, dept, state
                );
            }
        }
        AdminCommands::Deactivate { email } => set_active(&db, &email, false)?,
        AdminCommands::Activate { email } => set_active(&db, &email, true)?,
    }

    Ok(())
}

fn set_active(db: &PortalDb, email: &str, active: bool) -> Result<()> {
    let Some(admin) = db.find_admin_by_email(email)? else {
        bail!("No admin with email {}", email);
    };
    db.set_admin_active(&admin.id, active)?;
    let verb = if active { "Activated" } else { "Deactivated" };
    println!("{} {} <{}>", verb, admin.full_name, admin.email);
    Ok(())
}
